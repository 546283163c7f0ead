//! FAT commands

use bootregion_core::driver::DriverRef;
use bootregion_core::fat::format_entry;
use bootregion_core::session::Session;
use std::io::Write;
use std::rc::Rc;

/// List the directory a `fat:` region names
pub fn run_ls(session: &Session, text: &str) -> Result<(), Box<dyn std::error::Error>> {
    let fat = session.fat().ok_or("no FAT volume is mounted")?;
    let d = session.parse(text)?;
    let mounted: DriverRef = fat.clone();
    if !Rc::ptr_eq(&d.driver, &mounted) {
        return Err(format!("'{}' is not a FAT region", text).into());
    }

    let entries = fat.borrow_mut().list(&d)?;
    for entry in &entries {
        println!("{}", format_entry(entry));
    }
    println!("{} entries", entries.len());
    Ok(())
}

/// Write a file to stdout
pub fn run_cat(session: &Session, text: &str) -> Result<(), Box<dyn std::error::Error>> {
    let mut d = session.open(text)?;
    let mut buf = [0u8; 4096];
    let stdout = std::io::stdout();
    let mut out = stdout.lock();
    loop {
        let n = d.read(&mut buf)?;
        if n == 0 {
            break;
        }
        out.write_all(&buf[..n])?;
    }
    out.flush()?;
    d.close();
    Ok(())
}
