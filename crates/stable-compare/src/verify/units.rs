//! Human-readable magnitudes for log messages.

/// Byte units, base 1024.
pub const BYTE_SUFFIXES: &[&str] = &[
    "bytes", "KiB", "MiB", "GiB", "TiB", "PiB", "EiB", "ZiB", "YiB",
];

/// Row-count units, base 1000.
pub const ROW_SUFFIXES: &[&str] = &["", "K", "M", "G", "T", "P", "E", "Z", "Y"];

/// Format `num` with the largest suffix that keeps it below `step`.
///
/// Values in the first unit are printed as integers (`"999 bytes"`), larger
/// ones with two decimals and no space (`"1.00KiB"`, `"1.50K"`).
pub fn human_readable(num: u64, suffixes: &[&str], step: u64) -> String {
    let first = suffixes.first().copied().unwrap_or_default();
    if num < step || suffixes.len() < 2 {
        return format!("{} {}", num, first).trim_end().to_string();
    }

    let step = step as f64;
    let mut value = num as f64;
    let mut idx = 0;
    while value >= step && idx + 1 < suffixes.len() {
        value /= step;
        idx += 1;
    }
    format!("{:.2}{}", value, suffixes[idx])
}

/// Bytes in KiB/MiB/... units.
pub fn human_bytes(num: u64) -> String {
    human_readable(num, BYTE_SUFFIXES, 1024)
}

/// Rows in K/M/... units.
pub fn human_rows(num: u64) -> String {
    human_readable(num, ROW_SUFFIXES, 1000)
}

/// `prod - stage` as a signed delta.
pub fn signed_delta(prod: u64, stage: u64) -> i64 {
    let delta = i128::from(prod) - i128::from(stage);
    delta.clamp(i128::from(i64::MIN), i128::from(i64::MAX)) as i64
}

/// Direction word for a prod-minus-stage delta, read from stage's side.
pub fn direction(delta: i64) -> &'static str {
    if delta > 0 {
        "more"
    } else {
        "fewer"
    }
}
