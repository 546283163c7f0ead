//! Environment commands

use bootregion_core::env::{EnvEntry, EnvStore};

/// Print one key or every key
pub fn run_printenv(
    env: &EnvStore,
    key: Option<&str>,
    long: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    if !env.is_attached() {
        log::warn!("Environment is not attached to a region, showing defaults");
    }
    match key {
        Some(name) => {
            let entry = env
                .entries()
                .find(|e| e.key == name)
                .ok_or_else(|| format!("no environment key '{}'", name))?;
            println!("{}", format_entry(&entry, long));
        }
        None => {
            for entry in env.entries() {
                println!("{}", format_entry(&entry, long));
            }
        }
    }
    Ok(())
}

fn format_entry(entry: &EnvEntry<'_>, long: bool) -> String {
    let marker = if entry.is_default { '*' } else { ' ' };
    if long && !entry.description.is_empty() {
        format!(
            "{}{}={}\n    {}",
            marker, entry.key, entry.value, entry.description
        )
    } else {
        format!("{}{}={}", marker, entry.key, entry.value)
    }
}

/// Store a value
pub fn run_setenv(env: &mut EnvStore, key: &str, value: &str) -> Result<(), Box<dyn std::error::Error>> {
    env.store(key, value)?;
    log::info!("{}={}", key, value);
    Ok(())
}

/// Revert a key to its default
pub fn run_unsetenv(env: &mut EnvStore, key: &str) -> Result<(), Box<dyn std::error::Error>> {
    env.erase(key)?;
    println!("{} reverted to its default", key);
    Ok(())
}

/// Erase the whole environment region
pub fn run_eraseenv(env: &mut EnvStore) -> Result<(), Box<dyn std::error::Error>> {
    env.erase_all()?;
    println!("Environment erased");
    Ok(())
}

/// Drop dead records from the environment region
pub fn run_compactenv(env: &mut EnvStore) -> Result<(), Box<dyn std::error::Error>> {
    let before = env.log().free();
    env.compact()?;
    println!(
        "Environment compacted, {} bytes free (was {})",
        env.log().free(),
        before
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use bootregion_core::env::EnvKeys;

    #[test]
    fn test_format_entry() {
        let mut keys = EnvKeys::new();
        keys.register("bootargs", "console=ttyS0", "Kernel command line")
            .unwrap();
        keys.register("startup", "", "").unwrap();
        let env = EnvStore::detached(keys);
        let entries: Vec<_> = env.entries().collect();

        assert_eq!(format_entry(&entries[0], false), "*bootargs=console=ttyS0");
        assert_eq!(
            format_entry(&entries[0], true),
            "*bootargs=console=ttyS0\n    Kernel command line"
        );
        assert_eq!(format_entry(&entries[1], true), "*startup=");
    }
}
