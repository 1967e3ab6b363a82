use anyhow::Result;

fn main() -> Result<()> {
    faultkit::cli::run(faultkit::cli::Program::Pagefail)
}
