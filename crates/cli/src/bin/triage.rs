use anyhow::Result;

fn main() -> Result<()> {
    triage_cli::main_entry()
}
