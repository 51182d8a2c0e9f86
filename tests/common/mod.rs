#![allow(dead_code)]

pub mod temp_files {
    use std::io::Write;
    use tempfile::NamedTempFile;

    /// Write `content` to a fresh temp file that lives as long as the handle.
    pub fn create_temp_yaml(content: &str) -> NamedTempFile {
        let mut file = tempfile::Builder::new()
            .prefix("neurite_test_")
            .suffix(".yaml")
            .tempfile()
            .unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file.flush().unwrap();
        file
    }
}

pub mod engines {
    use http::StatusCode;
    use neurite::{Context, Engine, EngineConfig, ExecutionMode, HandlerResult};

    pub fn config(execution: ExecutionMode, workers: usize, queue: usize) -> EngineConfig {
        EngineConfig {
            workers,
            queue_capacity: queue,
            execution,
            ..EngineConfig::default()
        }
    }

    pub fn ok(ctx: &mut Context) -> HandlerResult {
        ctx.text(StatusCode::OK, "ok")
    }

    /// An engine with nothing registered yet.
    pub fn inline() -> Engine {
        Engine::new(config(ExecutionMode::Inline, 1, 1)).unwrap()
    }

    pub fn pooled(workers: usize, queue: usize) -> Engine {
        Engine::new(config(ExecutionMode::Pooled, workers, queue)).unwrap()
    }
}

pub mod capture {
    use std::io;
    use std::sync::{Arc, Mutex};
    use tracing_subscriber::fmt::MakeWriter;

    /// Collects formatted log lines written on the current thread.
    #[derive(Clone, Default)]
    pub struct LogCapture {
        buf: Arc<Mutex<Vec<u8>>>,
    }

    pub struct CaptureWriter(Arc<Mutex<Vec<u8>>>);

    impl io::Write for CaptureWriter {
        fn write(&mut self, data: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(data);
            Ok(data.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl<'a> MakeWriter<'a> for LogCapture {
        type Writer = CaptureWriter;

        fn make_writer(&'a self) -> Self::Writer {
            CaptureWriter(Arc::clone(&self.buf))
        }
    }

    impl LogCapture {
        /// Install as the thread's default subscriber until the guard drops.
        pub fn install(&self) -> tracing::subscriber::DefaultGuard {
            let subscriber = tracing_subscriber::fmt()
                .json()
                .with_max_level(tracing::Level::DEBUG)
                .with_writer(self.clone())
                .finish();
            tracing::subscriber::set_default(subscriber)
        }

        pub fn contents(&self) -> String {
            String::from_utf8_lossy(&self.buf.lock().unwrap()).into_owned()
        }
    }
}
