mod cli;

use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::Parser;

use cli::{Cli, Commands};
use htpack::server::{self, Mount, PackService};
use htpack::{packed, packer, HandlerBuilder};

fn main() -> Result<()> {
    let cli = Cli::parse();

    let env_filter = std::env::var("RUST_LOG").unwrap_or_else(|_| {
        if cli.verbose {
            "htpack=debug".to_string()
        } else {
            "htpack=info".to_string()
        }
    });
    tracing_subscriber::fmt()
        .with_env_filter(&env_filter)
        .init();

    match cli.command {
        Commands::Pack {
            out,
            manifest,
            chdir,
            inputs,
        } => run_pack(&out, manifest.as_deref(), chdir.as_deref(), &inputs),
        Commands::Manifest { out, chdir, inputs } => run_manifest(&out, chdir.as_deref(), &inputs),
        Commands::Inspect { json, files } => run_inspect(json, &files),
        Commands::Serve {
            bind,
            index_file,
            headers,
            header_file,
            expiry,
            packs,
        } => {
            let rt = tokio::runtime::Runtime::new()?;
            rt.block_on(run_serve(
                &bind,
                index_file.as_deref(),
                &headers,
                header_file.as_deref(),
                expiry,
                &packs,
            ))
        }
    }
}

fn run_pack(
    out: &Path,
    manifest: Option<&Path>,
    chdir: Option<&Path>,
    inputs: &[PathBuf],
) -> Result<()> {
    // Resolve output (and manifest) before any chdir so relative arguments
    // keep meaning what the caller typed.
    let out = std::path::absolute(out).with_context(|| format!("resolve {}", out.display()))?;
    let manifest = manifest
        .map(std::path::absolute)
        .transpose()
        .context("resolve manifest path")?;

    if let Some(dir) = chdir {
        std::env::set_current_dir(dir).with_context(|| format!("chdir {}", dir.display()))?;
    }

    let files = match &manifest {
        Some(path) => {
            if !inputs.is_empty() {
                bail!("cannot list input files when --manifest is given");
            }
            packer::manifest::from_yaml_file(path)?
        }
        None => {
            if inputs.is_empty() {
                bail!("need --manifest, or one or more files/directories");
            }
            packer::manifest::from_inputs(inputs)?
        }
    };

    packer::pack(&files, &out)?;
    Ok(())
}

fn run_manifest(out: &Path, chdir: Option<&Path>, inputs: &[PathBuf]) -> Result<()> {
    let out = std::path::absolute(out).with_context(|| format!("resolve {}", out.display()))?;
    if let Some(dir) = chdir {
        std::env::set_current_dir(dir).with_context(|| format!("chdir {}", dir.display()))?;
    }

    let files = packer::manifest::from_inputs(inputs)?;
    let yaml = packer::manifest::to_yaml(&files)?;
    std::fs::write(&out, yaml).with_context(|| format!("write {}", out.display()))?;
    Ok(())
}

fn run_inspect(json: bool, files: &[PathBuf]) -> Result<()> {
    let mut failed = false;
    for path in files {
        if let Err(e) = inspect_one(path, json) {
            eprintln!("{}: {e}", path.display());
            failed = true;
        }
    }
    if failed {
        std::process::exit(1);
    }
    Ok(())
}

fn inspect_one(path: &Path, json: bool) -> Result<()> {
    let f = File::open(path).with_context(|| format!("open {}", path.display()))?;
    let (hdr, dir) = packed::load(&f)?;

    if json {
        let entries: serde_json::Map<String, serde_json::Value> = dir
            .files
            .iter()
            .map(|(path, info)| {
                let variant = |data: &Option<packed::FileData>| {
                    data.as_ref()
                        .map(|d| serde_json::json!({ "offset": d.offset, "length": d.length }))
                };
                (
                    path.clone(),
                    serde_json::json!({
                        "content_type": info.content_type,
                        "etag": info.etag,
                        "uncompressed": variant(&info.uncompressed),
                        "gzip": variant(&info.gzip),
                        "brotli": variant(&info.brotli),
                    }),
                )
            })
            .collect();
        let doc = serde_json::json!({
            "version": hdr.version,
            "directory_offset": hdr.directory_offset,
            "directory_length": hdr.directory_length,
            "files": entries,
        });
        println!("{}", serde_json::to_string_pretty(&doc)?);
        return Ok(());
    }

    println!(
        "{}: version {}, directory at {} ({} bytes), {} files",
        path.display(),
        hdr.version,
        hdr.directory_offset,
        hdr.directory_length,
        dir.files.len()
    );

    let mut paths: Vec<&String> = dir.files.keys().collect();
    paths.sort();
    for entry_path in paths {
        let info = &dir.files[entry_path];
        println!(" • {entry_path}");
        println!("    · Etag:         {}", info.etag);
        println!("    · Content type: {}", info.content_type);
        if let Some(u) = &info.uncompressed {
            println!(
                "    · Uncompressed: {} (offset {})",
                human_size(u.length),
                u.offset
            );
            print_variant("Gzipped", &info.gzip, u.length);
            print_variant("Brotli", &info.brotli, u.length);
        }
    }
    Ok(())
}

fn print_variant(label: &str, data: &Option<packed::FileData>, uncompressed_len: u64) {
    match data {
        Some(d) => {
            let ratio = if uncompressed_len > 0 {
                100.0 * d.length as f64 / uncompressed_len as f64
            } else {
                100.0
            };
            println!(
                "    · {label}:{}{} (offset {}, {ratio:.1}%)",
                " ".repeat(13_usize.saturating_sub(label.len())),
                human_size(d.length),
                d.offset
            );
        }
        None => println!("    · {label}:{}absent", " ".repeat(13_usize.saturating_sub(label.len()))),
    }
}

fn human_size(size: u64) -> String {
    match size {
        s if s < 1 << 10 => format!("{s} bytes"),
        s if s < 1 << 20 => format!("{:.1} KiB", s as f64 / (1u64 << 10) as f64),
        s if s < 1 << 30 => format!("{:.1} MiB", s as f64 / (1u64 << 20) as f64),
        s => format!("{:.1} GiB", s as f64 / (1u64 << 30) as f64),
    }
}

async fn run_serve(
    bind: &str,
    index_file: Option<&str>,
    headers: &[String],
    header_file: Option<&Path>,
    expiry: u64,
    packs: &[String],
) -> Result<()> {
    let mut extra_headers = Vec::new();
    for spec in headers {
        extra_headers.push(parse_header(spec)?);
    }
    if let Some(path) = header_file {
        extra_headers.extend(load_header_file(path)?);
    }
    extra_headers.push((
        "Cache-Control".to_string(),
        if expiry == 0 {
            "no-store".to_string()
        } else {
            format!("public, max-age={expiry}")
        },
    ));

    let mut mounts = Vec::new();
    for spec in packs {
        let (prefix, pack_path) = match spec.split_once('=') {
            Some((prefix, path)) => (prefix.to_string(), path.to_string()),
            None => ("/".to_string(), spec.clone()),
        };

        let mut builder = HandlerBuilder::new(&pack_path);
        for (name, value) in &extra_headers {
            builder = builder.header(name, value);
        }
        if let Some(index) = index_file {
            builder = builder.index_file(index);
        }
        let handler = builder.build().with_context(|| format!("loading {pack_path}"))?;
        mounts.push(Mount::new(prefix, Arc::new(handler)));
    }

    let service = Arc::new(PackService::new(mounts)?);
    let listener = tokio::net::TcpListener::bind(bind)
        .await
        .with_context(|| format!("bind {bind}"))?;

    let cancel = tokio_util::sync::CancellationToken::new();
    server::serve(listener, service, cancel).await?;
    Ok(())
}

fn parse_header(spec: &str) -> Result<(String, String)> {
    match spec.split_once('=') {
        Some((name, value)) if !name.trim().is_empty() => {
            Ok((name.trim().to_string(), value.trim().to_string()))
        }
        _ => bail!("header {spec:?} must be in the form Name=value"),
    }
}

fn load_header_file(path: &Path) -> Result<Vec<(String, String)>> {
    let raw =
        std::fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;

    let mut headers = Vec::new();
    for (line_num, line) in raw.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let header = parse_header(line)
            .with_context(|| format!("{}: line {}", path.display(), line_num + 1))?;
        headers.push(header);
    }
    Ok(headers)
}
