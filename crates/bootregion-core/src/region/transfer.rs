//! Region to region copy

use super::RegionDescriptor;
use crate::error::{Error, Result};

/// Copy from the cursor of `src` to the cursor of `dst`
///
/// Copies until `src` runs out or `dst` is full, whichever comes first,
/// staging through `buf`. `progress` is called with the running total after
/// every chunk. Returns the number of bytes copied.
pub fn copy(
    src: &mut RegionDescriptor,
    dst: &mut RegionDescriptor,
    buf: &mut [u8],
    mut progress: impl FnMut(u64),
) -> Result<u64> {
    if buf.is_empty() {
        return Err(Error::Param);
    }
    let total = src.remaining().min(dst.remaining());
    if total < src.remaining() {
        log::warn!(
            "{} is larger than {}, copying the first {} bytes",
            src.driver_name,
            dst.driver_name,
            total
        );
    }

    let mut copied = 0u64;
    while copied < total {
        let want = (buf.len() as u64).min(total - copied) as usize;
        let n = src.read(&mut buf[..want])?;
        if n == 0 {
            break;
        }

        let mut written = 0;
        while written < n {
            let w = dst.write(&buf[written..n])?;
            if w == 0 {
                log::debug!("Short write to {} at {}", dst.driver_name, dst.index);
                return Err(Error::IoFailure);
            }
            written += w;
        }
        copied += n as u64;
        progress(copied);
    }
    Ok(copied)
}
