use json;
use rand::Rng;
use std::time::{Instant, SystemTime};

/// Placeholder logged in place of a method's parameters when the
/// method name matches a configured `log_protect` prefix.
pub const REDACTED_PARAMS_STR: &str = "**PARAMS REDACTED**";

/// Returns a string of random numbers of the requested length
pub fn random_number(size: usize) -> String {
    let mut rng = rand::thread_rng();
    let num: u64 = rng.gen_range(100_000_000_000..1_000_000_000_000);
    format!("{:0width$}", num, width = size)[0..size].to_string()
}

/// Converts a JSON number or string to an isize if possible
pub fn json_isize(value: &json::JsonValue) -> Option<isize> {
    if let Some(i) = value.as_isize() {
        return Some(i);
    } else if let Some(s) = value.as_str() {
        if let Ok(i2) = s.parse::<isize>() {
            return Some(i2);
        }
    };

    None
}

/// Converts a JSON number or string to an usize if possible
pub fn json_usize(value: &json::JsonValue) -> Option<usize> {
    if let Some(i) = value.as_usize() {
        return Some(i);
    } else if let Some(s) = value.as_str() {
        if let Ok(i2) = s.parse::<usize>() {
            return Some(i2);
        }
    };

    None
}

pub struct Timer {
    /// Duration of this timer in seconds.
    /// Timer is "done" once this many seconds have passed
    /// since start_time.
    duration: i32,

    /// Moment this timer starts.
    start_time: Instant,
}

impl Timer {
    pub fn new(duration: i32) -> Timer {
        Timer {
            duration,
            start_time: Instant::now(),
        }
    }

    pub fn reset(&mut self) {
        self.start_time = Instant::now();
    }

    pub fn remaining(&self) -> i32 {
        self.duration - self.start_time.elapsed().as_secs() as i32
    }

    pub fn done(&self) -> bool {
        self.remaining() <= 0
    }
}

/// Seconds since the epoch, as a float, so callers that want
/// sub-second precision (e.g. registration timestamps) can have it.
pub fn epoch_secs() -> f64 {
    if let Ok(dur) = SystemTime::now().duration_since(SystemTime::UNIX_EPOCH) {
        dur.as_millis() as f64 / 1000.0
    } else {
        0.0
    }
}

pub fn epoch_secs_str() -> String {
    format!("{:0<3}", epoch_secs())
}

/// Creates a JSON-stringified version of a list of method parameters
/// for logging, replacing the params with a generic redaction message
/// when the method name matches a configured log_protect prefix.
///
/// ```
/// let method = "opensrf.system.private.stuff";
/// let log_protect = vec!["opensrf.system.private".to_string()];
/// let params = vec![];
///
/// let s = opensrf::util::stringify_params(method, &params, &log_protect);
/// assert_eq!(s.as_str(), opensrf::util::REDACTED_PARAMS_STR);
/// ```
pub fn stringify_params(
    method: &str,
    params: &Vec<json::JsonValue>,
    log_protect: &Vec<String>,
) -> String {
    if log_protect.iter().any(|m| method.starts_with(m.as_str())) {
        REDACTED_PARAMS_STR.to_string()
    } else {
        params
            .iter()
            .map(|p| p.dump())
            .collect::<Vec<_>>()
            .join(", ")
    }
}
