use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{anyhow, bail, Context};
use clap::{Parser, Subcommand};
use log::info;
use relic_core::FileDevice;
use relic_ntfs::{
    discover_partitions, interpret_boot_sector, shared_device, structures::ATTR_TYPE_DATA,
    AttributeStream, BufferPool, DirectoryIndex, FoundAttribute, Mft, Partition, PathResolver,
    VolumeGeometry,
};

#[derive(Parser)]
#[command(name = "relic")]
#[command(about = "Read-only NTFS inspection over raw block devices", long_about = None)]
struct Cli {
    /// Block device or disk image to inspect
    device: PathBuf,

    /// MBR slot of the volume to open (default: first NTFS partition)
    #[arg(short, long, global = true)]
    partition: Option<u8>,

    /// Treat the device as a bare NTFS volume without an MBR
    #[arg(long, global = true)]
    no_mbr: bool,

    /// Emit machine-readable JSON instead of tables
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List the MBR partition table
    Partitions,
    /// Show decoded volume geometry
    Info,
    /// Show the well-known metadata file catalog
    Catalog,
    /// List a directory
    Ls {
        /// Absolute path, `/` separated (backslashes accepted)
        path: String,
    },
    /// Write a file's unnamed DATA stream to stdout
    Cat { path: String },
    /// Dump one MFT record by index
    Record { index: u64 },
}

fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();
    let cli = Cli::parse();

    let device = FileDevice::open(&cli.device)
        .with_context(|| format!("opening {}", cli.device.display()))?;
    let shared = shared_device(device);
    let span = Partition::whole_device(shared, 512)?;
    let pool = BufferPool::new();

    if let Commands::Partitions = cli.command {
        let parts = discover_partitions(&span, &pool)?;
        if cli.json {
            println!("{}", serde_json::to_string_pretty(&parts)?);
        } else if parts.is_empty() {
            println!("No partitions in the MBR.");
        } else {
            for p in &parts {
                println!(
                    "slot {}: type {:#04x}{}  LBA {:>10}  {:>10} sectors{}",
                    p.index,
                    p.partition_type,
                    if p.is_ntfs() { " (NTFS)" } else { "" },
                    p.start_lba,
                    p.sector_count,
                    if p.bootable { "  bootable" } else { "" },
                );
            }
        }
        return Ok(());
    }

    let volume = open_volume(&cli, &span, &pool)?;
    let geometry = interpret_boot_sector(&volume, &pool)?;

    match cli.command {
        Commands::Partitions => unreachable!("handled above"),
        Commands::Info => {
            if cli.json {
                println!("{}", serde_json::to_string_pretty(&geometry)?);
            } else {
                print_geometry(&geometry);
            }
        }
        Commands::Catalog => {
            let mft = Mft::bootstrap(&volume, &pool, geometry)?;
            let catalog = mft.catalog()?;
            if cli.json {
                println!("{}", serde_json::to_string_pretty(&catalog)?);
            } else {
                for entry in &catalog {
                    println!("{:>2}  {:<12}  LBA {}", entry.index, entry.name, entry.lba);
                }
            }
        }
        Commands::Ls { path } => {
            let mft = Mft::bootstrap(&volume, &pool, geometry)?;
            let record = PathResolver::new()
                .resolve(&mft, &path)?
                .ok_or_else(|| anyhow!("{}: no such path", path))?;
            let index = DirectoryIndex::open(&volume, &pool, geometry, &record)?;
            let entries = index.entries()?;
            if cli.json {
                println!("{}", serde_json::to_string_pretty(&entries)?);
            } else {
                for entry in &entries {
                    println!(
                        "{:>8}  {:>12}  {}{}",
                        entry.record_index(),
                        entry.size,
                        entry.name,
                        if entry.is_directory() { "/" } else { "" },
                    );
                }
            }
        }
        Commands::Cat { path } => {
            let mft = Mft::bootstrap(&volume, &pool, geometry)?;
            let record = PathResolver::new()
                .resolve(&mft, &path)?
                .ok_or_else(|| anyhow!("{}: no such path", path))?;
            if record.is_directory() {
                bail!("{}: is a directory", path);
            }
            let found = mft
                .find_attribute(&record, ATTR_TYPE_DATA, 0, None)?
                .ok_or_else(|| anyhow!("{}: no unnamed DATA stream", path))?;
            cat_attribute(&volume, &pool, geometry, &found)?;
        }
        Commands::Record { index } => {
            let mft = Mft::bootstrap(&volume, &pool, geometry)?;
            let record = mft.get_file_record(index)?;
            println!(
                "record {}: seq {}, {}{}",
                record.index(),
                record.sequence_number(),
                if record.is_in_use() { "in use" } else { "free" },
                if record.is_directory() { ", directory" } else { "" },
            );
            if let Some(name) = record.primary_name()? {
                println!("name: {}", name);
            }
            for attr in record.attributes() {
                let attr = attr?;
                println!(
                    "  attribute {:#04x} id {}  {}  {} bytes",
                    attr.type_code(),
                    attr.attribute_id(),
                    if attr.is_resident() { "resident" } else { "non-resident" },
                    attr.content_size()?,
                );
            }
            hex_dump(record.data());
        }
    }
    Ok(())
}

/// Pick the volume partition: explicit slot, first NTFS entry, or the whole
/// device when `--no-mbr` is given.
fn open_volume(cli: &Cli, span: &Partition, pool: &Arc<BufferPool>) -> anyhow::Result<Partition> {
    if cli.no_mbr {
        return Ok(Partition::new(
            span.device(),
            0,
            span.sector_count(),
            span.bytes_per_sector(),
        ));
    }
    let parts = discover_partitions(span, pool)?;
    let chosen = match cli.partition {
        Some(slot) => parts
            .iter()
            .find(|p| p.index == slot)
            .ok_or_else(|| anyhow!("no partition in MBR slot {}", slot))?,
        None => parts
            .iter()
            .find(|p| p.is_ntfs())
            .ok_or_else(|| anyhow!("no NTFS partition in the MBR (try --no-mbr for a bare volume)"))?,
    };
    info!(
        "using MBR slot {} at LBA {} ({} sectors)",
        chosen.index, chosen.start_lba, chosen.sector_count
    );
    Ok(Partition::new(
        span.device(),
        chosen.start_lba,
        chosen.sector_count,
        span.bytes_per_sector(),
    ))
}

fn print_geometry(g: &VolumeGeometry) {
    println!("bytes per sector:    {}", g.bytes_per_sector);
    println!("sectors per cluster: {}", g.sectors_per_cluster);
    println!("cluster size:        {}", g.cluster_size);
    println!("total sectors:       {}", g.total_sectors);
    println!("MFT cluster:         {}", g.mft_cluster);
    println!("MFT mirror cluster:  {}", g.mft_mirror_cluster);
    println!("record size:         {}", g.record_size);
    println!("index block size:    {}", g.index_block_size);
    println!("volume serial:       {:016X}", g.volume_serial);
}

/// Stream a DATA attribute to stdout, bounded by its logical size.
fn cat_attribute(
    volume: &Partition,
    pool: &Arc<BufferPool>,
    geometry: VolumeGeometry,
    found: &FoundAttribute,
) -> anyhow::Result<()> {
    let attr = found.attribute()?;
    let stdout = std::io::stdout();
    let mut out = stdout.lock();
    if attr.is_resident() {
        out.write_all(attr.resident_value()?)?;
        return Ok(());
    }

    let mut remaining = attr.content_size()?;
    let mut stream = AttributeStream::open(volume, pool, geometry, &attr)?;
    let mut buf = vec![0u8; 64 * 1024];
    while remaining > 0 {
        let want = remaining.min(buf.len() as u64) as usize;
        let got = stream.read(&mut buf[..want])?;
        if got == 0 {
            bail!("stream ended {} bytes before the declared size", remaining);
        }
        out.write_all(&buf[..got])?;
        remaining -= got as u64;
    }
    Ok(())
}

fn hex_dump(data: &[u8]) {
    for (row, chunk) in data.chunks(16).enumerate() {
        let ascii: String = chunk
            .iter()
            .map(|&b| if (0x20..0x7F).contains(&b) { b as char } else { '.' })
            .collect();
        println!("{:08x}  {:<32}  {}", row * 16, hex::encode(chunk), ascii);
    }
}
