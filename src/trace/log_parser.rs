//! CSV trace parsing.
//!
//! Traces are CSV files with the header
//! `Timestamp,MAC,Command,Flags,Index,Payload,Version[,Channel]`
//! (the channel column is optional). Malformed lines are skipped with a
//! debug log; a bad record never aborts ingestion.

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;
use std::sync::LazyLock;

use color_eyre::eyre::{Context, Result};
use regex::Regex;

use super::timestamp::parse_timestamp;
use super::{Flag, PacketRecord};

/// Match one bracketed payload byte: "[AA]"
static PAYLOAD_BYTE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\[([0-9A-Fa-f]{2})\]").expect("Invalid payload regex"));

/// Parse a payload column like "[01][A2][FF]" into bytes.
///
/// An empty column is the no-payload sentinel.
fn parse_payload(field: &str) -> Option<Vec<u8>> {
    let field = field.trim();
    if field.is_empty() {
        return None;
    }

    let bytes: Vec<u8> = PAYLOAD_BYTE
        .captures_iter(field)
        .map(|caps| u8::from_str_radix(&caps[1], 16).unwrap())
        .collect();

    if bytes.is_empty() {
        None
    } else {
        Some(bytes)
    }
}

/// Parse one CSV data line into a record.
///
/// Returns `None` for lines that do not decode (wrong column count,
/// unparseable timestamp or numeric fields).
pub fn parse_record_line(line: &str) -> Option<PacketRecord> {
    let fields: Vec<&str> = line.split(',').map(str::trim).collect();
    if fields.len() != 7 && fields.len() != 8 {
        return None;
    }

    let timestamp = match parse_timestamp(fields[0]) {
        Ok(ts) => ts,
        Err(e) => {
            log::debug!("Skipping record with bad timestamp: {}", e);
            return None;
        }
    };

    let index: u16 = fields[4].parse().ok()?;
    let version: u32 = fields[6].parse().ok()?;

    Some(PacketRecord {
        timestamp,
        mac: fields[1].to_string(),
        command: fields[2].to_string(),
        flag: Flag::from_tag(fields[3]),
        index,
        payload: parse_payload(fields[5]),
        version,
        channel: fields.get(7).map(|s| s.to_string()),
    })
}

/// Parse a whole trace file.
///
/// The header line is recognized by its leading `Timestamp` column and
/// skipped; every other undecodable line is counted and logged, not fatal.
pub fn parse_trace_file(path: &Path) -> Result<Vec<PacketRecord>> {
    let file = File::open(path)
        .with_context(|| format!("Failed to open trace file: {}", path.display()))?;
    let reader = BufReader::with_capacity(64 * 1024, file);

    let mut records = Vec::new();
    let mut skipped = 0usize;

    for line_result in reader.lines() {
        let line = match line_result {
            Ok(l) => l,
            Err(_) => continue, // Skip undecodable lines
        };

        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with("Timestamp") {
            continue;
        }

        match parse_record_line(trimmed) {
            Some(record) => records.push(record),
            None => skipped += 1,
        }
    }

    if skipped > 0 {
        log::warn!(
            "Skipped {} malformed lines in {}",
            skipped,
            path.display()
        );
    }
    log::debug!("Parsed {} records from {}", records.len(), path.display());

    Ok(records)
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use tempfile::NamedTempFile;

    use super::*;

    #[test]
    fn test_parse_record_line() {
        let line = "[12.34.567.890],AA:BB:CC:DD:EE:FF:00,[0056],[RESP],3,[01][A2],42,1";
        let record = parse_record_line(line).unwrap();
        assert_eq!(record.mac, "AA:BB:CC:DD:EE:FF:00");
        assert_eq!(record.command, "[0056]");
        assert_eq!(record.flag, Flag::Resp);
        assert_eq!(record.index, 3);
        assert_eq!(record.payload, Some(vec![0x01, 0xA2]));
        assert_eq!(record.version, 42);
        assert_eq!(record.channel.as_deref(), Some("1"));
    }

    #[test]
    fn test_parse_record_line_without_channel() {
        let line = "[0.1.000.000],AA:BB,[0056],[GET],5,,7";
        let record = parse_record_line(line).unwrap();
        assert_eq!(record.payload, None);
        assert_eq!(record.channel, None);
    }

    #[test]
    fn test_malformed_lines_rejected() {
        assert!(parse_record_line("").is_none());
        assert!(parse_record_line("not,enough,columns").is_none());
        assert!(parse_record_line("[bad],AA,[01],[SET],1,,2").is_none());
        assert!(parse_record_line("[0.0.0.0],AA,[01],[SET],notanum,,2").is_none());
    }

    #[test]
    fn test_parse_trace_file_skips_header_and_bad_lines() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "Timestamp,MAC,Command,Flags,Index,Payload,Version").unwrap();
        writeln!(file, "[0.1.000.000],AA:BB,[0056],[RESP],3,[01],10").unwrap();
        writeln!(file, "garbage line").unwrap();
        writeln!(file, "[0.1.020.000],CC:DD,[0056],[RESP],3,[01],10").unwrap();

        let records = parse_trace_file(file.path()).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].mac, "AA:BB");
        assert_eq!(records[1].mac, "CC:DD");
    }
}
