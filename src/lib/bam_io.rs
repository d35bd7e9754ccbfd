//! BAM file I/O utilities.
//!
//! Creates BAM readers and writers with consistent error handling. Partition
//! workers use [`create_indexed_bam_reader`] so each worker can slice its own
//! genomic region without sharing file handles.

use anyhow::{Context, Result};
use noodles::bam;
use noodles::bgzf;
use noodles::sam::Header;
use std::fs::File;
use std::path::Path;

/// A plain (sequential) BAM reader over a file.
pub type BamReader = bam::io::Reader<bgzf::io::Reader<File>>;

/// An indexed BAM reader supporting region queries (requires a .bai index).
pub type IndexedBamReader = bam::io::IndexedReader<bgzf::io::Reader<File>>;

/// A BAM writer over a file.
pub type BamWriter = bam::io::Writer<bgzf::io::Writer<File>>;

/// Opens a BAM file for sequential reading and reads its header.
///
/// # Errors
/// Returns an error if the file cannot be opened or the header is invalid.
pub fn create_bam_reader<P: AsRef<Path>>(path: P) -> Result<(BamReader, Header)> {
    let path_ref = path.as_ref();
    let file = File::open(path_ref)
        .with_context(|| format!("Failed to open BAM file: {}", path_ref.display()))?;
    let mut reader = bam::io::Reader::new(file);
    let header = reader
        .read_header()
        .with_context(|| format!("Failed to read BAM header: {}", path_ref.display()))?;
    Ok((reader, header))
}

/// Opens an indexed BAM file for region queries and reads its header.
///
/// The index is located next to the BAM (`.bai` suffix conventions handled
/// by noodles).
///
/// # Errors
/// Returns an error if the file or its index cannot be opened.
pub fn create_indexed_bam_reader<P: AsRef<Path>>(path: P) -> Result<(IndexedBamReader, Header)> {
    let path_ref = path.as_ref();
    let mut reader = bam::io::indexed_reader::Builder::default()
        .build_from_path(path_ref)
        .with_context(|| format!("Failed to open indexed BAM file: {}", path_ref.display()))?;
    let header = reader
        .read_header()
        .with_context(|| format!("Failed to read BAM header: {}", path_ref.display()))?;
    Ok((reader, header))
}

/// Creates a BAM writer and writes the header.
///
/// # Errors
/// Returns an error if the file cannot be created or the header written.
pub fn create_bam_writer<P: AsRef<Path>>(path: P, header: &Header) -> Result<BamWriter> {
    let path_ref = path.as_ref();
    let file = File::create(path_ref)
        .with_context(|| format!("Failed to create BAM file: {}", path_ref.display()))?;
    let mut writer = bam::io::Writer::new(file);
    writer
        .write_header(header)
        .with_context(|| format!("Failed to write BAM header: {}", path_ref.display()))?;
    Ok(writer)
}

/// Flushes and finalizes a BAM writer, writing the BGZF EOF block.
///
/// # Errors
/// Returns an error if the trailing blocks cannot be written.
pub fn finish_bam_writer(writer: BamWriter) -> Result<()> {
    writer.into_inner().finish().context("Failed to finalize BAM output")?;
    Ok(())
}
