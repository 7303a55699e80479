use std::path::PathBuf;

use clap::{ArgAction, Args, Parser, Subcommand};

#[derive(Parser)]
#[command(
    name = "diskpack",
    about = "Content-addressed pack-file blob storage",
    version,
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Storage root directory (overrides the config file)
    #[arg(long, global = true)]
    pub root: Option<PathBuf>,

    /// TOML config file
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Pack size limit in bytes (overrides the config file)
    #[arg(long, global = true)]
    pub max_pack_size: Option<u64>,

    /// Index backend (overrides the config file)
    #[arg(long, global = true)]
    pub index: Option<IndexKind>,

    /// Repeat for more log output (-v info, -vv debug, -vvv trace)
    #[arg(short, long, global = true, action = ArgAction::Count)]
    pub verbose: u8,

    #[arg(long, global = true, default_value = "text")]
    pub format: OutputFormat,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, clap::ValueEnum)]
pub enum IndexKind {
    Log,
    Memory,
}

#[derive(Subcommand)]
pub enum Command {
    /// Store files as blobs
    Put(PutArgs),
    /// Write a blob's content to stdout or a file
    Get(GetArgs),
    /// Remove blobs from the index
    Rm(RmArgs),
    /// List blobs in ref order
    Ls(LsArgs),
    /// Show sizes of blobs
    Stat(StatArgs),
    /// Start a new active pack
    Rotate,
    /// Rescan packs and update the index
    Reindex(ReindexArgs),
    /// Check every pack for malformed records
    Verify,
    /// Show storage layout and counts
    Info,
}

#[derive(Args)]
pub struct PutArgs {
    /// Files to store; `-` reads stdin
    #[arg(required = true)]
    pub files: Vec<PathBuf>,
    /// Ref to store under (single file only; defaults to the BLAKE3 digest)
    #[arg(long = "ref")]
    pub blob_ref: Option<String>,
}

#[derive(Args)]
pub struct GetArgs {
    pub blob_ref: String,
    #[arg(short, long)]
    pub output: Option<PathBuf>,
}

#[derive(Args)]
pub struct RmArgs {
    #[arg(required = true)]
    pub refs: Vec<String>,
}

#[derive(Args)]
pub struct LsArgs {
    /// Start after this ref
    #[arg(long)]
    pub after: Option<String>,
    #[arg(short = 'n', long, default_value = "100")]
    pub limit: usize,
}

#[derive(Args)]
pub struct StatArgs {
    #[arg(required = true)]
    pub refs: Vec<String>,
}

#[derive(Args)]
pub struct ReindexArgs {
    /// Rescan every pack from the start, restoring removed blobs
    #[arg(long)]
    pub full: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_put() {
        let cli = Cli::try_parse_from(["diskpack", "put", "a.txt", "b.txt"]).unwrap();
        if let Command::Put(args) = cli.command {
            assert_eq!(args.files, vec![PathBuf::from("a.txt"), PathBuf::from("b.txt")]);
            assert!(args.blob_ref.is_none());
        } else { panic!("wrong command"); }
    }

    #[test]
    fn parse_put_with_ref() {
        let cli = Cli::try_parse_from(["diskpack", "put", "--ref", "sha1-abc", "a.txt"]).unwrap();
        if let Command::Put(args) = cli.command {
            assert_eq!(args.blob_ref, Some("sha1-abc".into()));
        } else { panic!("wrong command"); }
    }

    #[test]
    fn put_requires_files() {
        assert!(Cli::try_parse_from(["diskpack", "put"]).is_err());
    }

    #[test]
    fn parse_get_output() {
        let cli = Cli::try_parse_from(["diskpack", "get", "sha1-abc", "-o", "out.bin"]).unwrap();
        if let Command::Get(args) = cli.command {
            assert_eq!(args.blob_ref, "sha1-abc");
            assert_eq!(args.output, Some(PathBuf::from("out.bin")));
        } else { panic!("wrong command"); }
    }

    #[test]
    fn parse_ls() {
        let cli = Cli::try_parse_from(["diskpack", "ls", "--after", "sha1-a", "-n", "5"]).unwrap();
        if let Command::Ls(args) = cli.command {
            assert_eq!(args.after, Some("sha1-a".into()));
            assert_eq!(args.limit, 5);
        } else { panic!("wrong command"); }
    }

    #[test]
    fn parse_ls_defaults() {
        let cli = Cli::try_parse_from(["diskpack", "ls"]).unwrap();
        if let Command::Ls(args) = cli.command {
            assert!(args.after.is_none());
            assert_eq!(args.limit, 100);
        } else { panic!("wrong command"); }
    }

    #[test]
    fn parse_rm_many() {
        let cli = Cli::try_parse_from(["diskpack", "rm", "sha1-a", "sha1-b"]).unwrap();
        if let Command::Rm(args) = cli.command {
            assert_eq!(args.refs, vec!["sha1-a", "sha1-b"]);
        } else { panic!("wrong command"); }
    }

    #[test]
    fn parse_reindex_full() {
        let cli = Cli::try_parse_from(["diskpack", "reindex", "--full"]).unwrap();
        assert!(matches!(cli.command, Command::Reindex(ReindexArgs { full: true })));
    }

    #[test]
    fn parse_admin_commands() {
        let cli = Cli::try_parse_from(["diskpack", "rotate"]).unwrap();
        assert!(matches!(cli.command, Command::Rotate));
        let cli = Cli::try_parse_from(["diskpack", "verify"]).unwrap();
        assert!(matches!(cli.command, Command::Verify));
        let cli = Cli::try_parse_from(["diskpack", "info"]).unwrap();
        assert!(matches!(cli.command, Command::Info));
    }

    #[test]
    fn parse_global_flags() {
        let cli = Cli::try_parse_from([
            "diskpack", "info", "--root", "/srv/blobs", "--max-pack-size", "1048576",
            "--index", "memory", "-vv", "--format", "json",
        ])
        .unwrap();
        assert_eq!(cli.root, Some(PathBuf::from("/srv/blobs")));
        assert_eq!(cli.max_pack_size, Some(1 << 20));
        assert_eq!(cli.index, Some(IndexKind::Memory));
        assert_eq!(cli.verbose, 2);
        assert_eq!(cli.format, OutputFormat::Json);
    }

    #[test]
    fn rejects_unknown_index() {
        assert!(Cli::try_parse_from(["diskpack", "--index", "mongo", "info"]).is_err());
    }
}
