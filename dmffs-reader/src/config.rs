// Copyright 2024 Kevin Ludwig
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Resolves the mapped region's address and size from the host environment,
//! optionally overridden by a runtime configuration string.

use log::{error, warn};

/// Environment variable holding the region's base address, hexadecimal.
pub const ENV_FLASH_ADDR: &str = "FLASH_FS_ADDR";
/// Environment variable holding the region's size in bytes, hexadecimal.
pub const ENV_FLASH_SIZE: &str = "FLASH_FS_SIZE";

/// Resolved mount coordinates: a raw address and a byte count.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Config {
    pub flash_addr: usize,
    pub flash_size: usize,
}

impl Config {
    /// Reads `FLASH_FS_ADDR`/`FLASH_FS_SIZE` from the environment. Returns
    /// `None` if either is unset or fails to parse as a hex integer.
    pub fn from_env() -> Option<Self> {
        let addr = std::env::var(ENV_FLASH_ADDR).ok()?;
        let size = std::env::var(ENV_FLASH_SIZE).ok()?;
        let flash_addr = parse_hex(&addr)?;
        let flash_size = parse_hex(&size)?;
        Some(Self {
            flash_addr,
            flash_size,
        })
    }

    /// Applies a `key=value(;key=value)*` override string on top of `self`.
    /// Recognized keys are `flash_addr` and `flash_size`; unknown keys warn
    /// and are ignored. A malformed pair (no `=`) is fatal, per the original
    /// module's treatment of a bad configuration string.
    pub fn apply_overrides(mut self, overrides: &str) -> Option<Self> {
        if overrides.is_empty() {
            return Some(self);
        }
        for pair in overrides.split(';') {
            let Some((key, value)) = pair.split_once('=') else {
                error!("malformed configuration entry: {pair:?}");
                return None;
            };
            match key {
                "flash_addr" => self.flash_addr = parse_hex(value)?,
                "flash_size" => self.flash_size = parse_hex(value)?,
                other => warn!("unknown configuration key, ignoring: {other:?}"),
            }
        }
        Some(self)
    }
}

/// Tolerant hex parser: accepts an optional `0x`/`0X` prefix, logs and stops
/// at the first invalid character rather than failing outright, mirroring
/// the original module's `parse_hex_string`.
fn parse_hex(text: &str) -> Option<usize> {
    let digits = text.strip_prefix("0x").or_else(|| text.strip_prefix("0X")).unwrap_or(text);
    if digits.is_empty() {
        return None;
    }
    let mut result: usize = 0;
    for c in digits.chars() {
        let Some(digit) = c.to_digit(16) else {
            error!("invalid character in hex string {text:?}: {c:?}");
            break;
        };
        result = (result << 4) | digit as usize;
    }
    Some(result)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_hex_with_and_without_prefix() {
        assert_eq!(parse_hex("0x1000"), Some(0x1000));
        assert_eq!(parse_hex("1000"), Some(0x1000));
        assert_eq!(parse_hex("0XFF"), Some(0xFF));
    }

    #[test]
    fn stops_at_first_invalid_character() {
        assert_eq!(parse_hex("12g4"), Some(0x12));
    }

    #[test]
    fn override_string_updates_named_fields() {
        let base = Config {
            flash_addr: 0,
            flash_size: 0,
        };
        let updated = base
            .apply_overrides("flash_addr=0x2000;flash_size=0x100")
            .unwrap();
        assert_eq!(updated.flash_addr, 0x2000);
        assert_eq!(updated.flash_size, 0x100);
    }

    #[test]
    fn unknown_keys_are_ignored() {
        let base = Config {
            flash_addr: 1,
            flash_size: 2,
        };
        let updated = base.apply_overrides("bogus=1").unwrap();
        assert_eq!(updated, base);
    }

    #[test]
    fn malformed_pair_fails_the_whole_override() {
        let base = Config {
            flash_addr: 1,
            flash_size: 2,
        };
        assert!(base.apply_overrides("flash_addr").is_none());
    }
}
