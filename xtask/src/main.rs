//! Build and task support for the llama-stack-operator workspace.

use std::{
    path::{Path, PathBuf},
    process,
};

mod check;
mod generate;

fn main() {
    use clap::{Command, crate_authors, crate_name, crate_version};
    let cmd = Command::new(crate_name!())
        .author(crate_authors!())
        .version(crate_version!())
        .about("Build + task support for llama-stack-operator")
        .subcommand_required(true)
        .subcommands(&[
            Command::new("manifests").about("generate CRD and webhook manifests into config/"),
            Command::new("check")
                .about("verify the distribution registry matches the embedded base configs"),
        ]);

    if let Err(e) = match cmd.get_matches().subcommand() {
        Some(("manifests", _)) => generate::manifests(),
        Some(("check", _)) => check::registry(),
        _ => unreachable!(),
    } {
        eprintln!("{e}");
        process::exit(1);
    }
}

type DynError = Box<dyn std::error::Error>;
type Result<T> = std::result::Result<T, DynError>;

/// Workspace reports the workspace root directory.
fn workspace() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR"))
        .parent()
        .expect("xtask lives directly under the workspace root")
        .to_path_buf()
}
