//! Panic capture for the dispatch boundary.
//!
//! `catch_unwind` only hands back the payload. The hook installed here runs at
//! the panic site, so it records the location and a backtrace in a
//! thread-local that the dispatcher picks up after unwinding.

use std::any::Any;
use std::backtrace::Backtrace;
use std::cell::RefCell;
use std::sync::Once;

/// Details of the last panic on this thread.
#[derive(Debug)]
pub(crate) struct PanicReport {
    pub message: String,
    pub location: Option<String>,
    pub backtrace: Option<Backtrace>,
}

struct Captured {
    location: Option<String>,
    backtrace: Backtrace,
}

thread_local! {
    static LAST_PANIC: RefCell<Option<Captured>> = const { RefCell::new(None) };
}

static INSTALL: Once = Once::new();

/// Chain a capturing hook in front of the current panic hook. Idempotent.
pub(crate) fn install_panic_hook() {
    INSTALL.call_once(|| {
        let previous = std::panic::take_hook();
        std::panic::set_hook(Box::new(move |info| {
            let captured = Captured {
                location: info
                    .location()
                    .map(|l| format!("{}:{}:{}", l.file(), l.line(), l.column())),
                backtrace: Backtrace::force_capture(),
            };
            LAST_PANIC.with(|slot| *slot.borrow_mut() = Some(captured));
            previous(info);
        }));
    });
}

/// Build a report for a payload returned by `catch_unwind` on this thread.
pub(crate) fn take_report(payload: &(dyn Any + Send)) -> PanicReport {
    let captured = LAST_PANIC.with(|slot| slot.borrow_mut().take());
    PanicReport {
        message: crate::worker_pool::panic_message(payload),
        location: captured.as_ref().and_then(|c| c.location.clone()),
        backtrace: captured.map(|c| c.backtrace),
    }
}
