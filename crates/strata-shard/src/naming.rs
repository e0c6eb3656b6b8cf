//! Zero-padded numeric names for shard directories and sequential files.

pub use strata_config::width_for;

/// Render `n` left-padded with zeros to `width` digits.
pub fn format_name(n: u64, width: usize) -> String {
    format!("{n:0width$}")
}

/// Parse a purely numeric name (`[0-9]+`). Anything else yields `None`.
pub fn parse_name(name: &str) -> Option<u64> {
    if name.is_empty() || !name.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    name.parse().ok()
}

/// Name of the `n`th sequential file in a leaf, e.g. `007.jpg`.
pub fn sequential_name(n: u64, width: usize, extension: &str) -> String {
    format!("{}.{extension}", format_name(n, width))
}

/// Parse a sequential file name (`[0-9]+.<extension>`).
pub fn parse_sequential(name: &str, extension: &str) -> Option<u64> {
    let stem = name.strip_suffix(extension)?.strip_suffix('.')?;
    parse_name(stem)
}
