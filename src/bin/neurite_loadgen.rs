fn main() -> anyhow::Result<()> {
    neurite::cli::run_cli()
}
