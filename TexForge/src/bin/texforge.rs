fn main() -> anyhow::Result<()> {
    texforge::cli::run_cli()
}
