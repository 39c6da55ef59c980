use std::io::Error;

/// Upper bound on CPU ids tracked by the per-CPU counter groups.
pub const MAX_CPUS: usize = 1024;

/// Returns a vector of logical CPU IDs for CPUs which are present.
pub fn cpus() -> Result<Vec<usize>, Error> {
    let raw =
        std::fs::read_to_string("/sys/devices/system/cpu/present").map(|v| v.trim().to_string())?;

    parse_cpu_list(&raw)
}

/// Parses the kernel's cpu list format, eg: `0-3,8,10-11`.
fn parse_cpu_list(raw: &str) -> Result<Vec<usize>, Error> {
    let mut ids = Vec::new();

    for range in raw.split(',') {
        let mut parts = range.split('-');

        let first: Option<usize> = parts
            .next()
            .map(|text| text.parse())
            .transpose()
            .map_err(|_| Error::other("could not parse"))?;
        let second: Option<usize> = parts
            .next()
            .map(|text| text.parse())
            .transpose()
            .map_err(|_| Error::other("could not parse"))?;

        if parts.next().is_some() {
            // The line is invalid.
            return Err(Error::other("could not parse"));
        }

        match (first, second) {
            (Some(value), None) => ids.push(value),
            (Some(start), Some(stop)) => ids.extend(start..=stop),
            _ => continue,
        }
    }

    Ok(ids)
}

/// The command name of a running process, read from `/proc/<pid>/comm`.
pub fn process_name(pid: u32) -> Option<String> {
    std::fs::read_to_string(format!("/proc/{pid}/comm"))
        .ok()
        .map(|name| name.trim_end().to_string())
        .filter(|name| !name.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cpu_list() {
        assert_eq!(parse_cpu_list("0").unwrap(), vec![0]);
        assert_eq!(parse_cpu_list("0-3").unwrap(), vec![0, 1, 2, 3]);
        assert_eq!(parse_cpu_list("0-1,4,6-7").unwrap(), vec![0, 1, 4, 6, 7]);
        assert!(parse_cpu_list("0-1-2").is_err());
        assert!(parse_cpu_list("a-b").is_err());
    }

    #[test]
    fn missing_process() {
        assert_eq!(process_name(u32::MAX), None);
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn own_process() {
        assert!(process_name(std::process::id()).is_some());
    }
}
