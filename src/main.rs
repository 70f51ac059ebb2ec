fn main() -> anyhow::Result<()> {
    pagelift::cli::run()
}
