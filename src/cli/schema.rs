use std::path::PathBuf;

use clap::Args;

use super::CliContext;
use dslink_broker::schema::write_schema;

#[derive(Args, Debug)]
pub struct SchemaArgs {
    /// Directory the schema files are written to
    #[arg(long, default_value = "schemas")]
    pub out: PathBuf,
}

pub async fn execute(args: SchemaArgs, _context: &CliContext) -> anyhow::Result<()> {
    let written = write_schema(&args.out)?;
    for file in &written {
        println!("{}", file.display());
    }
    println!("Schemas written to {}", args.out.display());
    Ok(())
}
