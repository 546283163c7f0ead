//! Driver listing

use bootregion_core::driver::Ops;
use bootregion_core::session::Session;

/// List registered drivers with their capabilities
pub fn list_drivers(session: &Session) {
    println!("Registered drivers:");
    println!();
    println!("{:<10} {:<8} {:<28} {:>10}  Description", "Name", "Present", "Operations", "Write unit");
    println!("{}", "-".repeat(76));

    for driver in session.registry().iter() {
        let present = if driver.is_present() { "yes" } else { "no" };
        let mut description = driver.info.description.clone();
        if driver.info.is_fs_describing() {
            description.push_str(" [filesystem]");
        }
        println!(
            "{:<10} {:<8} {:<28} {:>10}  {}",
            driver.info.name,
            present,
            format_ops(driver.ops),
            format_size(driver.info.write_granularity),
            description
        );
    }
}

fn format_ops(ops: Ops) -> String {
    const NAMES: [(Ops, &str); 6] = [
        (Ops::OPEN, "open"),
        (Ops::READ, "read"),
        (Ops::WRITE, "write"),
        (Ops::ERASE, "erase"),
        (Ops::SEEK, "seek"),
        (Ops::INFO, "info"),
    ];
    let names: Vec<&str> = NAMES
        .iter()
        .filter(|(op, _)| ops.contains(*op))
        .map(|(_, name)| *name)
        .collect();
    names.join(",")
}

fn format_size(bytes: u32) -> String {
    if bytes == 0 {
        "-".to_string()
    } else if bytes >= 1024 * 1024 {
        format!("{} MiB", bytes / (1024 * 1024))
    } else if bytes >= 1024 {
        format!("{} KiB", bytes / 1024)
    } else {
        format!("{} B", bytes)
    }
}
