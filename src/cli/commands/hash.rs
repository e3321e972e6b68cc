//! Hash command - print cache keys

use crate::cli::args::HashArgs;
use crate::enhance::EnvSpec;
use crate::error::BoostResult;
use crate::hash::HashKey;

/// Execute the hash command
pub async fn execute(args: HashArgs) -> BoostResult<()> {
    let key = match args.archive {
        Some(archive) => HashKey::for_archive(&archive)?,
        None => EnvSpec::new(args.packages, args.requirements)?.key(),
    };
    println!("{}", key);
    Ok(())
}
