use std::fs::File;
use std::io::{self, BufWriter, Read, Write};
use std::path::Path;

use anyhow::{bail, Context};
use colored::Colorize;
use diskpack_index::IndexConfig;
use diskpack_store::{DiskPackedStorage, ReindexMode, StoreConfig};
use diskpack_types::{BlobRef, SizedRef};
use tracing::debug;

use crate::cli::*;

pub fn run_command(cli: Cli) -> anyhow::Result<()> {
    let config = load_config(&cli)?;
    debug!(
        root = %config.root.display(),
        index = config.index.kind(),
        max_pack_size = config.max_pack_size,
        "opening storage"
    );
    let store = DiskPackedStorage::open(&config)
        .with_context(|| format!("opening storage at {}", config.root.display()))?;

    let format = cli.format;
    let result = match cli.command {
        Command::Put(args) => cmd_put(&store, args, format),
        Command::Get(args) => cmd_get(&store, args),
        Command::Rm(args) => cmd_rm(&store, args, format),
        Command::Ls(args) => cmd_ls(&store, args, format),
        Command::Stat(args) => cmd_stat(&store, args, format),
        Command::Rotate => cmd_rotate(&store, format),
        Command::Reindex(args) => cmd_reindex(&store, args, format),
        Command::Verify => cmd_verify(&store, format),
        Command::Info => cmd_info(&store, format),
    };
    store.close()?;
    result
}

/// Config file first, then command-line overrides.
pub fn load_config(cli: &Cli) -> anyhow::Result<StoreConfig> {
    let mut config = match &cli.config {
        Some(path) => StoreConfig::from_file(path)?,
        None => StoreConfig::default(),
    };
    if let Some(root) = &cli.root {
        config.root = root.clone();
    }
    if let Some(size) = cli.max_pack_size {
        config.max_pack_size = size;
    }
    match cli.index {
        Some(IndexKind::Memory) => config.index = IndexConfig::Memory,
        Some(IndexKind::Log) if !matches!(config.index, IndexConfig::Log { .. }) => {
            config.index = IndexConfig::log();
        }
        _ => {}
    }
    config.validate()?;
    Ok(config)
}

fn parse_ref(s: &str) -> anyhow::Result<BlobRef> {
    BlobRef::new(s).with_context(|| format!("invalid ref {s:?}"))
}

fn parse_refs(refs: &[String]) -> anyhow::Result<Vec<BlobRef>> {
    refs.iter().map(|s| parse_ref(s)).collect()
}

fn read_input(path: &Path) -> anyhow::Result<Vec<u8>> {
    let mut buf = Vec::new();
    if path == Path::new("-") {
        io::stdin().lock().read_to_end(&mut buf)?;
    } else {
        File::open(path)
            .with_context(|| format!("reading {}", path.display()))?
            .read_to_end(&mut buf)?;
    }
    Ok(buf)
}

fn print_json<T: serde::Serialize + ?Sized>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn print_sized(list: &[SizedRef]) {
    for sized in list {
        println!("{}\t{}", sized.blob_ref, sized.size);
    }
}

fn cmd_put(store: &DiskPackedStorage, args: PutArgs, format: OutputFormat) -> anyhow::Result<()> {
    if args.blob_ref.is_some() && args.files.len() > 1 {
        bail!("--ref applies to a single file, got {}", args.files.len());
    }
    let explicit = args.blob_ref.as_deref().map(parse_ref).transpose()?;

    let mut stored = Vec::with_capacity(args.files.len());
    for path in &args.files {
        let content = read_input(path)?;
        let blob_ref = match &explicit {
            Some(r) => r.clone(),
            None => BlobRef::blake3_of(&content),
        };
        let sized = store
            .receive(&blob_ref, content.as_slice())
            .with_context(|| format!("storing {}", path.display()))?;
        if format == OutputFormat::Text {
            println!(
                "{} {} ({} bytes) {}",
                "✓".green(),
                sized.blob_ref.to_string().yellow(),
                sized.size,
                path.display()
            );
        }
        stored.push(sized);
    }
    if format == OutputFormat::Json {
        print_json(&stored)?;
    }
    Ok(())
}

fn cmd_get(store: &DiskPackedStorage, args: GetArgs) -> anyhow::Result<()> {
    let blob_ref = parse_ref(&args.blob_ref)?;
    let (mut reader, _size) = store.fetch(&blob_ref)?;
    match &args.output {
        Some(path) => {
            let mut out = BufWriter::new(
                File::create(path).with_context(|| format!("creating {}", path.display()))?,
            );
            io::copy(&mut reader, &mut out)?;
            out.flush()?;
        }
        None => {
            let mut out = io::stdout().lock();
            io::copy(&mut reader, &mut out)?;
            out.flush()?;
        }
    }
    Ok(())
}

fn cmd_rm(store: &DiskPackedStorage, args: RmArgs, format: OutputFormat) -> anyhow::Result<()> {
    let refs = parse_refs(&args.refs)?;
    let removed = remove_present(store, &refs)?;
    match format {
        OutputFormat::Json => print_json(&serde_json::json!({
            "requested": refs.len(),
            "removed": removed,
        }))?,
        OutputFormat::Text => println!(
            "{} Removed {} of {} ref(s) from the index",
            "✓".green(),
            removed.len(),
            refs.len()
        ),
    }
    Ok(())
}

/// Remove `refs` and return the ones that were indexed.
fn remove_present(store: &DiskPackedStorage, refs: &[BlobRef]) -> anyhow::Result<Vec<BlobRef>> {
    let mut present: Vec<BlobRef> = store
        .stat_blobs(refs)?
        .into_iter()
        .map(|s| s.blob_ref)
        .collect();
    present.sort();
    present.dedup();
    store.remove_blobs(refs)?;
    Ok(present)
}

fn cmd_ls(store: &DiskPackedStorage, args: LsArgs, format: OutputFormat) -> anyhow::Result<()> {
    let after = args.after.as_deref().map(parse_ref).transpose()?;
    let list = store.enumerate_blobs(after.as_ref(), args.limit)?;
    match format {
        OutputFormat::Json => print_json(&list)?,
        OutputFormat::Text => print_sized(&list),
    }
    Ok(())
}

fn cmd_stat(store: &DiskPackedStorage, args: StatArgs, format: OutputFormat) -> anyhow::Result<()> {
    let refs = parse_refs(&args.refs)?;
    let found = store.stat_blobs(&refs)?;
    match format {
        OutputFormat::Json => print_json(&found)?,
        OutputFormat::Text => {
            print_sized(&found);
            for r in refs.iter().filter(|r| !found.iter().any(|s| &s.blob_ref == *r)) {
                println!("{}\t{}", r, "missing".red());
            }
        }
    }
    Ok(())
}

fn cmd_rotate(store: &DiskPackedStorage, format: OutputFormat) -> anyhow::Result<()> {
    let active = store.next_pack()?;
    match format {
        OutputFormat::Json => print_json(&serde_json::json!({ "active_pack": active }))?,
        OutputFormat::Text => println!(
            "{} Active pack is now {}",
            "✓".green(),
            store.filename(active).display().to_string().bold()
        ),
    }
    Ok(())
}

fn cmd_reindex(
    store: &DiskPackedStorage,
    args: ReindexArgs,
    format: OutputFormat,
) -> anyhow::Result<()> {
    let mode = if args.full { ReindexMode::Full } else { ReindexMode::Incremental };
    let report = store.reindex(mode)?;
    match format {
        OutputFormat::Json => print_json(&report)?,
        OutputFormat::Text => {
            println!("{} Reindex complete", "✓".green().bold());
            println!("  Packs scanned: {}", report.packs_scanned);
            println!("  Records indexed: {}", report.records_indexed);
            if report.garbage_bytes > 0 {
                println!(
                    "  Garbage: {} bytes in packs {:?}",
                    report.garbage_bytes.to_string().yellow(),
                    report.damaged_packs
                );
            }
            if !report.missing_packs.is_empty() {
                println!("  Missing packs: {:?}", report.missing_packs);
            }
        }
    }
    Ok(())
}

fn cmd_verify(store: &DiskPackedStorage, format: OutputFormat) -> anyhow::Result<()> {
    let scans = store.verify_packs()?;
    if format == OutputFormat::Json {
        return print_json(&scans);
    }
    for scan in &scans {
        let name = store.filename(scan.pack);
        let name = name.file_name().map(|n| n.to_string_lossy()).unwrap_or_default();
        match &scan.malformed {
            None => println!(
                "{} {}  {} records, {} bytes",
                "✓".green(),
                name,
                scan.records,
                scan.file_len
            ),
            Some(reason) => println!(
                "{} {}  {} records, {} trailing bytes at offset {}: {}",
                "!".yellow().bold(),
                name,
                scan.records,
                scan.garbage_bytes(),
                scan.valid_end,
                reason
            ),
        }
    }
    Ok(())
}

fn cmd_info(store: &DiskPackedStorage, format: OutputFormat) -> anyhow::Result<()> {
    let info = store.info()?;
    if format == OutputFormat::Json {
        return print_json(&info);
    }
    println!("Root: {}", info.root.display().to_string().bold());
    println!("Max pack size: {} bytes", info.max_pack_size);
    let index = if info.durable_index {
        "durable".green()
    } else {
        "in-memory".yellow()
    };
    println!("Index: {}", index);
    println!("Blobs: {}", info.blobs.to_string().bold());
    println!("Packs:");
    for pack in &info.packs {
        let marker = if pack.number == info.active_pack {
            "*".green().bold()
        } else {
            " ".normal()
        };
        println!("  {} {:05}  {} bytes", marker, pack.number, pack.len);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;
    use diskpack_index::SyncMode;

    fn cli(args: &[&str]) -> Cli {
        Cli::try_parse_from(std::iter::once("diskpack").chain(args.iter().copied())).unwrap()
    }

    #[test]
    fn flags_override_config_file() {
        let dir = tempfile::tempdir().unwrap();
        let config_path = dir.path().join("diskpack.toml");
        std::fs::write(
            &config_path,
            "root = \"/from/file\"\nmax_pack_size = 4096\nsync = \"every-write\"\n",
        )
        .unwrap();
        let config_arg = config_path.to_str().unwrap();

        let config = load_config(&cli(&["--config", config_arg, "info"])).unwrap();
        assert_eq!(config.root, Path::new("/from/file"));
        assert_eq!(config.max_pack_size, 4096);
        assert_eq!(config.sync, SyncMode::EveryWrite);

        let config = load_config(&cli(&[
            "--config", config_arg, "--root", "/from/flag", "--max-pack-size", "8192",
            "--index", "memory", "info",
        ]))
        .unwrap();
        assert_eq!(config.root, Path::new("/from/flag"));
        assert_eq!(config.max_pack_size, 8192);
        assert_eq!(config.index, IndexConfig::Memory);
        assert_eq!(config.sync, SyncMode::EveryWrite);
    }

    #[test]
    fn index_log_flag_keeps_configured_log_settings() {
        let dir = tempfile::tempdir().unwrap();
        let config_path = dir.path().join("diskpack.toml");
        std::fs::write(&config_path, "[index]\ntype = \"log\"\nfile = \"custom.log\"\n").unwrap();

        let config = load_config(&cli(&[
            "--config", config_path.to_str().unwrap(), "--index", "log", "info",
        ]))
        .unwrap();
        assert!(matches!(
            &config.index,
            IndexConfig::Log { file: Some(f), .. } if f.as_path() == Path::new("custom.log")
        ));
    }

    #[test]
    fn zero_pack_size_is_rejected() {
        assert!(load_config(&cli(&["--max-pack-size", "0", "info"])).is_err());
    }

    #[test]
    fn put_rm_and_reindex_through_commands() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("store");
        let root_arg = root.to_str().unwrap();
        let file = dir.path().join("hello.txt");
        std::fs::write(&file, b"hello diskpack").unwrap();
        let file_arg = file.to_str().unwrap();

        run_command(cli(&["--root", root_arg, "put", "--ref", "sha1-hello", file_arg])).unwrap();
        run_command(cli(&["--root", root_arg, "put", file_arg])).unwrap();

        let digest = BlobRef::blake3_of(b"hello diskpack");
        {
            let max = StoreConfig::default().max_pack_size;
            let store = DiskPackedStorage::new(&root, max, IndexConfig::log()).unwrap();
            let names: Vec<_> = store
                .enumerate_blobs(None, 10)
                .unwrap()
                .into_iter()
                .map(|s| s.blob_ref)
                .collect();
            let mut expected = vec![digest.clone(), BlobRef::new("sha1-hello").unwrap()];
            expected.sort();
            assert_eq!(names, expected);
            store.close().unwrap();
        }

        run_command(cli(&["--root", root_arg, "rm", "sha1-hello"])).unwrap();
        run_command(cli(&["--root", root_arg, "rotate"])).unwrap();
        let out = dir.path().join("out.bin");
        let out_arg = out.to_str().unwrap();
        run_command(cli(&["--root", root_arg, "get", digest.as_str(), "-o", out_arg])).unwrap();
        assert_eq!(std::fs::read(&out).unwrap(), b"hello diskpack");

        run_command(cli(&["--root", root_arg, "reindex", "--full"])).unwrap();
        let store = DiskPackedStorage::new(&root, 1 << 20, IndexConfig::log()).unwrap();
        assert_eq!(store.enumerate_blobs(None, 10).unwrap().len(), 2);
        assert_eq!(store.active_pack().unwrap(), 1);
    }

    #[test]
    fn rm_reports_only_indexed_refs() {
        let dir = tempfile::tempdir().unwrap();
        let store = DiskPackedStorage::new(dir.path(), 1 << 20, IndexConfig::Memory).unwrap();
        let a = BlobRef::new("sha1-a").unwrap();
        store.receive(&a, &b"A"[..]).unwrap();

        let refs = [a.clone(), BlobRef::new("sha1-absent").unwrap(), a.clone()];
        assert_eq!(remove_present(&store, &refs).unwrap(), vec![a.clone()]);
        assert!(remove_present(&store, &refs).unwrap().is_empty());
        assert!(store.stat_blobs(&[a]).unwrap().is_empty());
    }

    #[test]
    fn rm_accepts_json_format() {
        let dir = tempfile::tempdir().unwrap();
        let root_arg = dir.path().to_str().unwrap();
        run_command(cli(&["--root", root_arg, "--format", "json", "rm", "sha1-gone"])).unwrap();
    }

    #[test]
    fn ref_flag_with_many_files_fails() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("store");
        let a = dir.path().join("a");
        std::fs::write(&a, b"a").unwrap();
        let a_arg = a.to_str().unwrap();
        let root_arg = root.to_str().unwrap();
        let err = run_command(cli(&["--root", root_arg, "put", "--ref", "sha1-x", a_arg, a_arg]));
        assert!(err.is_err());
    }

    #[test]
    fn get_missing_ref_fails() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().to_str().unwrap();
        assert!(run_command(cli(&["--root", root, "get", "sha1-missing"])).is_err());
        assert!(run_command(cli(&["--root", root, "get", "not a ref"])).is_err());
    }
}
