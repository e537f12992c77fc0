//! Command-line front end for listing and extracting newc cpio archives.

use std::{
    ffi::OsString,
    path::{Path, PathBuf},
};

use anyhow::{bail, Context, Result};
use clap::Parser;

use cpio_archive::{
    fs::Materializer, parse_archive_with, Archive, ExtractError, HardlinkPolicy, Padding,
    ParseOptions,
};

/// cpioctl
#[derive(Debug, Parser)]
#[clap(name = "cpioctl", version)]
pub struct App {
    /// List the members of the archive instead of extracting anything
    #[clap(short, long)]
    list: bool,
    /// Show mode, owner, size and mtime when listing
    #[clap(short, long)]
    verbose: bool,
    /// Extract every member of the archive
    #[clap(short, long, conflicts_with = "files")]
    all: bool,
    /// Extract into this directory instead of the current one
    #[clap(short = 'C', long, default_value = ".")]
    directory: PathBuf,
    /// Locate padding by skipping NUL bytes instead of aligning to 4 bytes
    #[clap(long)]
    scan_padding: bool,
    /// Only treat empty records as hardlinks when they share an inode with the data record
    #[clap(long)]
    same_inode_links: bool,

    /// The archive to read
    archive: PathBuf,
    /// Members to extract.  Names without an exact match extract every member containing them.
    files: Vec<OsString>,
}

impl App {
    fn parse_options(&self) -> ParseOptions {
        ParseOptions {
            padding: if self.scan_padding {
                Padding::Scan
            } else {
                Padding::Aligned
            },
            hardlinks: if self.same_inode_links {
                HardlinkPolicy::SameInode
            } else {
                HardlinkPolicy::Consecutive
            },
        }
    }
}

fn list(archive: &Archive, verbose: bool) {
    for member in archive.members() {
        if verbose {
            println!("{member}");
        } else {
            println!("{}", Path::new(member.name()).display());
        }
    }
}

/// Logs every member that failed, then hands back an error summarizing the batch.
fn report(result: Result<(), ExtractError>) -> Result<()> {
    if let Err(ExtractError::Partial { failures, .. }) = &result {
        for failure in failures {
            let source = std::error::Error::source(&failure.error)
                .map(|source| format!(": {source}"))
                .unwrap_or_default();
            log::error!("{}{source}", failure.error);
        }
    }
    Ok(result?)
}

fn main() -> Result<()> {
    env_logger::init();

    let args = App::parse();
    let archive = parse_archive_with(&args.archive, args.parse_options())
        .with_context(|| format!("Failed to parse {:?}", args.archive))?;

    if args.list {
        list(&archive, args.verbose);
        return Ok(());
    }

    if args.all || !args.files.is_empty() {
        let materializer = Materializer::new(&args.directory)?;
        if args.all {
            report(archive.extract_all(&materializer))?;
        }
        let mut failed = 0;
        for name in &args.files {
            if let Err(err) = report(archive.extract_one(name, &materializer)) {
                log::error!("{err:#}");
                failed += 1;
            }
        }
        if failed > 0 {
            bail!(
                "{failed} of {} requested members could not be extracted",
                args.files.len()
            );
        }
        return Ok(());
    }

    // no request: just show the regular files
    for member in archive.regular_files() {
        println!("{}", Path::new(member.name()).display());
    }
    Ok(())
}
