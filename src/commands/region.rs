//! Region commands: info, dump, copy and erase

use bootregion_core::driver::Whence;
use bootregion_core::region::{self, RegionDescriptor};
use bootregion_core::session::Session;
use indicatif::{ProgressBar, ProgressStyle};

/// Largest staging buffer for copies
const MAX_CHUNK: usize = 64 * 1024;

/// Chunk used when the destination reports no write granularity
const DEFAULT_CHUNK: usize = 4096;

const DUMP_WIDTH: usize = 16;

fn create_progress_bar_style() -> Result<ProgressStyle, Box<dyn std::error::Error>> {
    Ok(ProgressStyle::default_bar()
        .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {bytes}/{total_bytes} ({bytes_per_sec}, {eta})")?
        .progress_chars("#>-"))
}

/// Print the driver's diagnostic dump for a region
pub fn run_info(session: &Session, text: &str) -> Result<(), Box<dyn std::error::Error>> {
    let mut d = session.parse(text)?;
    // Open when possible so filesystem drivers can describe the file
    if let Err(e) = d.open() {
        log::debug!("Showing unopened region {}: {}", text, e);
    }
    let mut out = String::new();
    d.info(&mut out)?;
    print!("{}", out);
    if d.is_open() {
        println!(
            "Region: {} start=0x{:08x} length=0x{:08x}",
            d.driver_name, d.start, d.length
        );
    }
    d.close();
    Ok(())
}

/// Hex dump a region to stdout
pub fn run_dump(
    session: &Session,
    text: &str,
    limit: Option<u64>,
) -> Result<(), Box<dyn std::error::Error>> {
    let mut d = session.open(text)?;
    let total = limit.map_or(d.remaining(), |l| l.min(d.remaining()));
    let mut line = [0u8; DUMP_WIDTH];
    let mut offset = 0u64;

    while offset < total {
        let want = (DUMP_WIDTH as u64).min(total - offset) as usize;
        let n = fill(&mut d, &mut line[..want])?;
        if n == 0 {
            break;
        }
        println!("{}", format_dump_line(d.start + offset, &line[..n]));
        offset += n as u64;
    }
    d.close();
    Ok(())
}

/// Read until `buf` is full or the region ends
fn fill(d: &mut RegionDescriptor, buf: &mut [u8]) -> bootregion_core::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        let n = d.read(&mut buf[filled..])?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    Ok(filled)
}

fn format_dump_line(address: u64, bytes: &[u8]) -> String {
    let mut hex = String::with_capacity(DUMP_WIDTH * 3);
    for (i, b) in bytes.iter().enumerate() {
        if i == DUMP_WIDTH / 2 {
            hex.push(' ');
        }
        hex.push_str(&format!("{:02x} ", b));
    }
    let ascii: String = bytes
        .iter()
        .map(|&b| if b.is_ascii_graphic() || b == b' ' { b as char } else { '.' })
        .collect();
    format!("{:08x}  {:<49} |{}|", address, hex, ascii)
}

/// Copy one region into another
pub fn run_copy(
    session: &Session,
    src: &str,
    dst: &str,
    erase: bool,
    show_progress: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let mut src = session.open(src)?;
    let mut dst = session.open(dst)?;

    let total = src.remaining().min(dst.remaining());
    if erase {
        let erased = dst.erase(total)?;
        log::info!("Erased {} bytes of {}", erased, dst.driver_name);
        dst.seek(0, Whence::Set)?;
    }

    let granularity = dst.driver.borrow().describe().write_granularity as usize;
    let chunk = match granularity {
        0 => DEFAULT_CHUNK,
        g => g.min(MAX_CHUNK),
    };
    let mut buf = vec![0u8; chunk];

    let pb = if show_progress && granularity != 0 {
        let pb = ProgressBar::new(total);
        pb.set_style(create_progress_bar_style()?);
        Some(pb)
    } else {
        None
    };

    let copied = region::copy(&mut src, &mut dst, &mut buf, |done| {
        if let Some(pb) = &pb {
            pb.set_position(done);
        }
    })?;
    if let Some(pb) = pb {
        pb.finish_and_clear();
    }

    println!(
        "Copied {} bytes from {} to {}",
        copied, src.driver_name, dst.driver_name
    );
    src.close();
    dst.close();
    Ok(())
}

/// Erase a whole region
pub fn run_erase(session: &Session, text: &str) -> Result<(), Box<dyn std::error::Error>> {
    let mut d = session.open(text)?;
    let len = d.remaining();
    let erased = d.erase(len)?;
    if erased < len {
        log::warn!("Erased only {} of {} bytes", erased, len);
    }
    println!(
        "Erased 0x{:x} bytes at {}:0x{:x}",
        erased, d.driver_name, d.start
    );
    d.close();
    Ok(())
}
