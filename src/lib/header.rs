//! Utilities for SAM header management.
//!
//! Adds @PG (program) records with PP chaining and checks the sort order
//! declared by the input header.

use anyhow::Result;
use bstr::BString;
use noodles::sam::Header;
use noodles::sam::header::record::value::Map;
use noodles::sam::header::record::value::map::Program;
use noodles::sam::header::record::value::map::header::sort_order::COORDINATE;
use noodles::sam::header::record::value::map::program::tag;
use std::collections::HashSet;

use crate::errors::FgdupError;

/// Get the ID of the last program in the @PG chain (for PP chaining).
///
/// Finds the program that is not referenced by any other program's PP tag,
/// i.e., the "leaf" of the chain.
#[must_use]
pub fn get_last_program_id(header: &Header) -> Option<String> {
    let programs = header.programs();
    let program_map = programs.as_ref();

    if program_map.is_empty() {
        return None;
    }

    let mut referenced: HashSet<&[u8]> = HashSet::new();
    for (_id, pg) in program_map {
        if let Some(pp) = pg.other_fields().get(&tag::PREVIOUS_PROGRAM_ID) {
            referenced.insert(pp.as_ref());
        }
    }

    for (id, _pg) in program_map {
        if !referenced.contains(id.as_slice()) {
            return Some(String::from_utf8_lossy(id).to_string());
        }
    }

    // Fallback: return any program ID (shouldn't happen with valid headers)
    program_map.keys().next().map(|id| String::from_utf8_lossy(id).to_string())
}

/// Create a unique program ID by appending .1, .2, etc. if needed.
#[must_use]
pub fn make_unique_program_id(header: &Header, base_id: &str) -> String {
    let programs = header.programs();
    let program_map = programs.as_ref();

    if !program_map.contains_key(base_id.as_bytes()) {
        return base_id.to_string();
    }

    for i in 1..=1000 {
        let candidate = format!("{base_id}.{i}");
        if !program_map.contains_key(candidate.as_bytes()) {
            return candidate;
        }
    }

    format!("{base_id}.{}", std::process::id())
}

/// Add a @PG record to an existing header with automatic PP chaining.
///
/// # Errors
/// Returns an error if the program record cannot be added to the header.
pub fn add_pg_record(mut header: Header, version: &str, command_line: &str) -> Result<Header> {
    let previous_program = get_last_program_id(&header);
    let unique_id = make_unique_program_id(&header, "fgdup");

    let mut builder = Map::<Program>::builder()
        .insert(tag::NAME, "fgdup")
        .insert(tag::VERSION, version)
        .insert(tag::COMMAND_LINE, command_line);
    if let Some(pp) = previous_program.as_deref() {
        builder = builder.insert(tag::PREVIOUS_PROGRAM_ID, pp);
    }
    let pg_record = builder.build()?;

    header.programs_mut().add(BString::from(unique_id), pg_record)?;

    Ok(header)
}

/// Checks that the header declares `SO:coordinate`.
///
/// # Errors
/// Returns [`FgdupError::NotCoordinateSorted`] with the sort order found
/// (or "missing") when the header declares anything else.
pub fn require_coordinate_sorted(header: &Header) -> crate::errors::Result<()> {
    let so = header.header().and_then(|hd| hd.other_fields().get(b"SO"));

    match so {
        Some(so) if <_ as AsRef<[u8]>>::as_ref(so) == COORDINATE => Ok(()),
        Some(other) => Err(FgdupError::NotCoordinateSorted {
            found: String::from_utf8_lossy(other.as_ref()).to_string(),
        }),
        None => Err(FgdupError::NotCoordinateSorted { found: "missing".to_string() }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn coordinate_header() -> Header {
        "@HD\tVN:1.6\tSO:coordinate\n".parse().unwrap()
    }

    #[test]
    fn test_require_coordinate_sorted_accepts_coordinate() {
        assert!(require_coordinate_sorted(&coordinate_header()).is_ok());
    }

    #[test]
    fn test_require_coordinate_sorted_rejects_missing() {
        let header = Header::default();
        assert!(require_coordinate_sorted(&header).is_err());
    }

    #[test]
    fn test_add_pg_record_creates_program() {
        let header = add_pg_record(coordinate_header(), "0.1.0", "fgdup collapse -i in.bam").unwrap();
        assert_eq!(header.programs().as_ref().len(), 1);
        assert!(header.programs().as_ref().contains_key(b"fgdup".as_slice()));
    }

    #[test]
    fn test_add_pg_record_chains_ids() {
        let header = add_pg_record(coordinate_header(), "0.1.0", "first").unwrap();
        let header = add_pg_record(header, "0.1.0", "second").unwrap();
        assert_eq!(header.programs().as_ref().len(), 2);
        assert!(header.programs().as_ref().contains_key(b"fgdup.1".as_slice()));
    }
}
