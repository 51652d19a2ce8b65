use std::fs::File;
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::time::Instant;

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use serde::Serialize;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;
use xxhash_rust::xxh3::xxh3_64;

use hcomp_core::numtype::{
    DFNT_CHAR8, DFNT_FLOAT32, DFNT_FLOAT64, DFNT_INT16, DFNT_INT32, DFNT_INT64, DFNT_INT8,
    DFNT_LITEND, DFNT_UCHAR8, DFNT_UINT16, DFNT_UINT32, DFNT_UINT64, DFNT_UINT8,
};
use hcomp_core::tag::{base_tag, is_special};
use hcomp_core::{
    AccessMode, Aid, CoderInfo, CompFile, FileOptions, Inquiry, ModelType, NBitParams,
    SpecialInfo, Whence, DEFAULT_SEGMENT_SIZE, DFTAG_COMPRESSED,
};

// ── CLI definition ─────────────────────────────────────────────────────────

#[derive(Parser)]
#[command(
    name = "hcomp",
    about = "Store, compress, append to, and read compressed elements in a container file",
    version
)]
struct Cli {
    /// Log more (-v info, -vv debug, -vvv trace); RUST_LOG overrides
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create an empty container
    Init {
        container: PathBuf,
    },
    /// Store a file as a new element
    Put {
        container: PathBuf,
        /// Source file ("-" reads stdin)
        input: PathBuf,
        #[command(flatten)]
        key: KeyArgs,
        /// Store uncompressed
        #[arg(long)]
        plain: bool,
        #[command(flatten)]
        coder: CoderArgs,
        /// Raw bytes per encoded segment
        #[arg(long, default_value_t = DEFAULT_SEGMENT_SIZE)]
        segment_size: usize,
    },
    /// Compress an existing plain element in place
    Compress {
        container: PathBuf,
        #[command(flatten)]
        key: KeyArgs,
        #[command(flatten)]
        coder: CoderArgs,
    },
    /// Append a file to the end of a compressed element
    Append {
        container: PathBuf,
        /// Source file ("-" reads stdin)
        input: PathBuf,
        #[command(flatten)]
        key: KeyArgs,
    },
    /// Decode a whole element
    Get {
        container: PathBuf,
        #[command(flatten)]
        key: KeyArgs,
        /// Destination file ("-" writes to stdout)
        output: PathBuf,
    },
    /// Decode a byte range of a compressed element
    ///
    /// Only the segments covering the range are read and decoded.
    ReadRange {
        container: PathBuf,
        #[command(flatten)]
        key: KeyArgs,
        #[arg(long)]
        offset: i32,
        #[arg(long)]
        len: u32,
        /// Write raw bytes to a file instead of printing a hex dump
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// List every element with its coder and content digest
    Inspect {
        container: PathBuf,
        /// Print JSON instead of a table
        #[arg(long)]
        json: bool,
    },
}

#[derive(Args, Clone, Copy)]
struct KeyArgs {
    #[arg(long)]
    tag: u16,
    #[arg(long = "ref")]
    reference: u16,
}

#[derive(Args, Clone)]
struct CoderArgs {
    /// Coder: none | rle | nbit | skphuff
    #[arg(long, default_value = "rle")]
    coder: String,
    /// N-bit number type, e.g. int16, uint32, float32; append "le" for little-endian
    #[arg(long, default_value = "int16")]
    nt: String,
    /// Highest bit of the N-bit field
    #[arg(long, default_value_t = 15)]
    start_bit: i32,
    /// Width of the N-bit field
    #[arg(long, default_value_t = 16)]
    bit_len: i32,
    /// Copy the field's top bit into the bits above it
    #[arg(long)]
    sign_ext: bool,
    /// Fill bits outside the field with ones
    #[arg(long)]
    fill_one: bool,
    /// Interleaved byte streams for skphuff (1-64)
    #[arg(long, default_value_t = 1)]
    skip_size: u32,
}

// ── Helpers ────────────────────────────────────────────────────────────────

fn init_tracing(verbose: u8) {
    let default = match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(io::stderr))
        .init();
}

fn number_type_from_name(name: &str) -> anyhow::Result<i32> {
    let (base, little_endian) = match name.strip_suffix("le") {
        Some(base) => (base.trim_end_matches('-'), true),
        None => (name, false),
    };
    let nt = match base {
        "uchar8" => DFNT_UCHAR8,
        "char8" => DFNT_CHAR8,
        "int8" => DFNT_INT8,
        "uint8" => DFNT_UINT8,
        "int16" => DFNT_INT16,
        "uint16" => DFNT_UINT16,
        "int32" => DFNT_INT32,
        "uint32" => DFNT_UINT32,
        "int64" => DFNT_INT64,
        "uint64" => DFNT_UINT64,
        "float32" => DFNT_FLOAT32,
        "float64" => DFNT_FLOAT64,
        other => other
            .parse::<i32>()
            .map_err(|_| anyhow::anyhow!("unknown number type '{}'", name))?,
    };
    Ok(if little_endian { nt | DFNT_LITEND } else { nt })
}

fn coder_from_args(args: &CoderArgs) -> anyhow::Result<CoderInfo> {
    match args.coder.as_str() {
        "none" => Ok(CoderInfo::None),
        "rle" => Ok(CoderInfo::Rle),
        "nbit" => Ok(CoderInfo::NBit(NBitParams {
            nt: number_type_from_name(&args.nt)?,
            sign_ext: args.sign_ext,
            fill_one: args.fill_one,
            start_bit: args.start_bit,
            bit_len: args.bit_len,
        })),
        "skphuff" | "huffman" => Ok(CoderInfo::skip_huffman(args.skip_size)),
        other => anyhow::bail!(
            "unknown coder '{}'. Valid options: none, rle, nbit, skphuff",
            other
        ),
    }
}

fn read_input(input: &Path) -> anyhow::Result<Vec<u8>> {
    let mut data = Vec::new();
    if input.to_str() == Some("-") {
        io::stdin().lock().read_to_end(&mut data)?;
    } else {
        File::open(input)
            .with_context(|| format!("opening input file {:?}", input))?
            .read_to_end(&mut data)?;
    }
    Ok(data)
}

fn write_output(output: &Path, data: &[u8]) -> anyhow::Result<()> {
    if output.to_str() == Some("-") {
        io::stdout().lock().write_all(data)?;
    } else {
        std::fs::write(output, data)
            .with_context(|| format!("creating output file {:?}", output))?;
    }
    Ok(())
}

fn open_container(path: &Path, access: AccessMode) -> anyhow::Result<CompFile> {
    CompFile::open_container(path, access).with_context(|| format!("opening container {:?}", path))
}

fn human_bytes(n: u64) -> String {
    const UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB"];
    let mut v = n as f64;
    let mut unit = 0;
    while v >= 1024.0 && unit < UNITS.len() - 1 {
        v /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{} B", n)
    } else {
        format!("{:.2} {}", v, UNITS[unit])
    }
}

fn hex_dump(offset: u64, bytes: &[u8]) {
    for (i, chunk) in bytes.chunks(16).enumerate() {
        print!("  {:08x}  ", offset + i as u64 * 16);
        for b in chunk {
            print!("{:02x} ", b);
        }
        for _ in chunk.len()..16 {
            print!("   ");
        }
        print!("  |");
        for b in chunk {
            if b.is_ascii_graphic() || *b == b' ' {
                print!("{}", *b as char);
            } else {
                print!(".");
            }
        }
        println!("|");
    }
}

fn print_compressed_stats(file: &CompFile, aid: Aid, elapsed_secs: f64) -> anyhow::Result<()> {
    let inq = file.inquire(aid)?;
    let info = file.info(aid)?;
    let raw = inq.length as u64;
    eprintln!("  coder       : {}", info.coder.name());
    eprintln!("  segments    : {}", info.status.segments);
    eprintln!("  raw size    : {}", human_bytes(raw));
    eprintln!("  compressed  : {}", human_bytes(info.comp_size as u64));
    if info.comp_size > 0 {
        eprintln!("  ratio       : {:.2}x", raw as f64 / info.comp_size as f64);
    }
    eprintln!("  elapsed     : {:.3}s", elapsed_secs);
    Ok(())
}

// ── Subcommand implementations ─────────────────────────────────────────────

fn run_init(container: PathBuf) -> anyhow::Result<()> {
    let file = CompFile::create_container(&container)
        .with_context(|| format!("creating container {:?}", container))?;
    file.close()?;
    eprintln!("created {:?}", container);
    Ok(())
}

fn run_put(
    container: PathBuf,
    input: PathBuf,
    key: KeyArgs,
    plain: bool,
    coder: &CoderArgs,
    segment_size: usize,
) -> anyhow::Result<()> {
    let data = read_input(&input)?;
    let options = FileOptions {
        segment_size,
        ..FileOptions::default()
    };
    let mut file = CompFile::open_container_with(&container, AccessMode::ReadWrite, options)
        .with_context(|| format!("opening container {:?}", container))?;

    if plain {
        let entry = file
            .put_plain(key.tag, key.reference, &data)
            .with_context(|| format!("storing plain element {}/{}", key.tag, key.reference))?;
        eprintln!("  stored {} plain at offset {}", human_bytes(entry.length as u64), entry.offset);
        return Ok(file.close()?);
    }

    let coder = coder_from_args(coder)?;
    let t0 = Instant::now();
    let aid = file
        .create(key.tag, key.reference, ModelType::Stdio, coder)
        .with_context(|| format!("creating compressed element {}/{}", key.tag, key.reference))?;
    for chunk in data.chunks(segment_size.max(1)) {
        file.write(aid, chunk)?;
    }
    file.flush(aid)?;
    tracing::info!(tag = key.tag, reference = key.reference, len = data.len(), "stored element");
    print_compressed_stats(&file, aid, t0.elapsed().as_secs_f64())?;
    file.end_access(aid)?;
    Ok(file.close()?)
}

fn run_compress(container: PathBuf, key: KeyArgs, coder: &CoderArgs) -> anyhow::Result<()> {
    let coder = coder_from_args(coder)?;
    let mut file = open_container(&container, AccessMode::ReadWrite)?;
    let t0 = Instant::now();
    let aid = file
        .create(key.tag, key.reference, ModelType::Stdio, coder)
        .with_context(|| format!("compressing element {}/{}", key.tag, key.reference))?;
    print_compressed_stats(&file, aid, t0.elapsed().as_secs_f64())?;
    file.end_access(aid)?;
    Ok(file.close()?)
}

fn run_append(container: PathBuf, input: PathBuf, key: KeyArgs) -> anyhow::Result<()> {
    let data = read_input(&input)?;
    let mut file = open_container(&container, AccessMode::ReadWrite)?;
    let aid = file
        .start_write(key.tag, key.reference)
        .with_context(|| format!("opening element {}/{} for append", key.tag, key.reference))?;
    let start = file.seek(aid, 0, Whence::End)?;
    file.write(aid, &data)?;
    file.end_access(aid)?;
    tracing::info!(tag = key.tag, reference = key.reference, start, len = data.len(), "appended");
    eprintln!(
        "  appended {} at offset {}",
        human_bytes(data.len() as u64),
        start
    );
    Ok(file.close()?)
}

/// Decode an element whether it is stored compressed or plain.
fn read_element(file: &mut CompFile, key: KeyArgs) -> anyhow::Result<Vec<u8>> {
    let compressed = file
        .storage()
        .dir
        .lookup(hcomp_core::special_tag(key.tag), key.reference)
        .is_some();
    if !compressed {
        return Ok(file.get_plain(key.tag, key.reference)?);
    }
    let aid = file.start_read(key.tag, key.reference)?;
    let data = file.read(aid, 0)?;
    file.end_access(aid)?;
    Ok(data)
}

fn run_get(container: PathBuf, key: KeyArgs, output: PathBuf) -> anyhow::Result<()> {
    let mut file = open_container(&container, AccessMode::Read)?;
    let t0 = Instant::now();
    let data = read_element(&mut file, key)
        .with_context(|| format!("reading element {}/{}", key.tag, key.reference))?;
    let elapsed = t0.elapsed();
    write_output(&output, &data)?;

    eprintln!("  raw size    : {}", human_bytes(data.len() as u64));
    eprintln!("  xxh3        : {:016x}", xxh3_64(&data));
    eprintln!(
        "  throughput  : {}/s",
        human_bytes((data.len() as f64 / elapsed.as_secs_f64().max(1e-9)) as u64)
    );
    Ok(file.close()?)
}

fn run_read_range(
    container: PathBuf,
    key: KeyArgs,
    offset: i32,
    len: u32,
    output: Option<PathBuf>,
) -> anyhow::Result<()> {
    let mut file = open_container(&container, AccessMode::Read)?;
    let aid = file
        .start_read(key.tag, key.reference)
        .with_context(|| format!("opening element {}/{}", key.tag, key.reference))?;
    let pos = file.seek(aid, offset, Whence::Start)?;

    let t0 = Instant::now();
    let raw = file
        .read(aid, len)
        .with_context(|| format!("reading {} bytes at offset {}", len, pos))?;
    let elapsed = t0.elapsed();
    eprintln!(
        "  decoded {} in {:.3}ms",
        human_bytes(raw.len() as u64),
        elapsed.as_secs_f64() * 1000.0
    );
    file.end_access(aid)?;

    match output {
        Some(path) => {
            std::fs::write(&path, &raw)?;
            eprintln!("  written to {:?}", path);
        }
        None => {
            let preview = &raw[..raw.len().min(256)];
            println!(
                "--- {}/{} bytes {}..{} (first {} shown) ---",
                key.tag,
                key.reference,
                pos,
                pos as u64 + raw.len() as u64,
                preview.len()
            );
            hex_dump(pos as u64, preview);
            if raw.len() > 256 {
                println!("  ... ({} bytes remaining not shown)", raw.len() - 256);
            }
        }
    }
    Ok(file.close()?)
}

#[derive(Serialize)]
struct ElementReport {
    tag: u16,
    reference: u16,
    kind: &'static str,
    offset: u64,
    length: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    digest: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    inquiry: Option<Inquiry>,
    #[serde(skip_serializing_if = "Option::is_none")]
    info: Option<SpecialInfo>,
}

fn run_inspect(container: PathBuf, json: bool) -> anyhow::Result<()> {
    let mut file = open_container(&container, AccessMode::Read)?;
    let mut reports = Vec::new();

    for entry in file.elements() {
        let mut report = ElementReport {
            tag: entry.tag,
            reference: entry.reference,
            kind: "plain",
            offset: entry.offset,
            length: entry.length,
            digest: None,
            inquiry: None,
            info: None,
        };
        if entry.tag == DFTAG_COMPRESSED {
            report.kind = "compressed-data";
        } else if is_special(entry.tag) {
            report.kind = "compressed";
            let aid = file
                .start_read(base_tag(entry.tag), entry.reference)
                .with_context(|| format!("opening element {}/{}", entry.tag, entry.reference))?;
            let data = file.read(aid, 0)?;
            report.digest = Some(format!("{:016x}", xxh3_64(&data)));
            report.inquiry = Some(file.inquire(aid)?);
            report.info = Some(file.info(aid)?);
            file.end_access(aid)?;
        } else {
            let data = file.get_plain(entry.tag, entry.reference)?;
            report.digest = Some(format!("{:016x}", xxh3_64(&data)));
        }
        reports.push(report);
    }

    if json {
        println!("{}", serde_json::to_string_pretty(&reports)?);
        return Ok(file.close()?);
    }

    let file_size = std::fs::metadata(&container)?.len();
    println!("=== Container: {:?} ===", container);
    println!();
    println!("  elements     : {}", reports.len());
    println!("  file on disk : {}", human_bytes(file_size));
    println!();
    println!(
        "  {:>6}  {:>6}  {:<16}  {:>10}  {:>12}  {:<8}  {:>16}",
        "tag", "ref", "kind", "offset", "length", "coder", "xxh3"
    );
    println!("  {}", "-".repeat(86));
    for r in &reports {
        let (length, coder) = match (&r.inquiry, &r.info) {
            (Some(inq), Some(info)) => (inq.length, info.coder.name()),
            _ => (r.length, "-"),
        };
        println!(
            "  {:>6}  {:>6}  {:<16}  {:>10}  {:>12}  {:<8}  {:>16}",
            r.tag,
            r.reference,
            r.kind,
            r.offset,
            human_bytes(length as u64),
            coder,
            r.digest.as_deref().unwrap_or("-")
        );
    }
    Ok(file.close()?)
}

// ── Entry point ────────────────────────────────────────────────────────────

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);
    match cli.command {
        Commands::Init { container } => run_init(container),
        Commands::Put {
            container,
            input,
            key,
            plain,
            coder,
            segment_size,
        } => run_put(container, input, key, plain, &coder, segment_size),
        Commands::Compress {
            container,
            key,
            coder,
        } => run_compress(container, key, &coder),
        Commands::Append {
            container,
            input,
            key,
        } => run_append(container, input, key),
        Commands::Get {
            container,
            key,
            output,
        } => run_get(container, key, output),
        Commands::ReadRange {
            container,
            key,
            offset,
            len,
            output,
        } => run_read_range(container, key, offset, len, output),
        Commands::Inspect { container, json } => run_inspect(container, json),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn number_type_names() {
        assert_eq!(number_type_from_name("int16").unwrap(), DFNT_INT16);
        assert_eq!(number_type_from_name("uint32le").unwrap(), DFNT_UINT32 | DFNT_LITEND);
        assert_eq!(number_type_from_name("float64-le").unwrap(), DFNT_FLOAT64 | DFNT_LITEND);
        assert_eq!(number_type_from_name("24").unwrap(), DFNT_INT32);
        assert!(number_type_from_name("int12").is_err());
    }

    #[test]
    fn human_readable_sizes() {
        assert_eq!(human_bytes(512), "512 B");
        assert_eq!(human_bytes(2048), "2.00 KB");
    }

    #[test]
    fn cli_parses_coder_flags() {
        let cli = Cli::try_parse_from([
            "hcomp", "put", "c.hcmp", "in.bin", "--tag", "702", "--ref", "3", "--coder", "nbit",
            "--nt", "int32", "--start-bit", "11", "--bit-len", "12", "--sign-ext",
        ])
        .unwrap();
        let Commands::Put { key, coder, .. } = cli.command else {
            panic!("expected put");
        };
        assert_eq!((key.tag, key.reference), (702, 3));
        let info = coder_from_args(&coder).unwrap();
        assert_eq!(
            info,
            CoderInfo::NBit(NBitParams {
                nt: DFNT_INT32,
                sign_ext: true,
                fill_one: false,
                start_bit: 11,
                bit_len: 12,
            })
        );
    }
}
