// SPDX-FileCopyrightText: 2026 Andrew Gunnerson
// SPDX-License-Identifier: GPL-3.0-only

use std::{
    fs::File,
    io::{BufReader, BufWriter, Seek, SeekFrom, Write},
    path::PathBuf,
};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use crate::{
    cli::{status, warning},
    format::sin::{self, PartitionUuid, SinHeader},
    stream::FromReader,
};

fn display_header(cli: &SinCli, header: &SinHeader) {
    if cli.quiet {
        return;
    }

    if cli.debug {
        println!("{header:#?}");
        return;
    }

    println!("Header size:   {}", header.header_size);
    println!("Payload type:  {:#x}", header.payload_type);
    println!("Hash type:     {:#x}", header.hash_type);
    println!("Partition ID:  {:#x}", header.partition_id);
    match &header.uuid {
        Some(uuid) => println!("UUID:          {uuid}"),
        None => println!("UUID:          <none>"),
    }
    println!("Image offset:  {}", header.image_offset);
    println!("Image size:    {}", header.image_size);
}

fn info_subcommand(sin_cli: &SinCli, cli: &InfoCli) -> Result<()> {
    let mut reader = File::open(&cli.input)
        .map(BufReader::new)
        .with_context(|| format!("Failed to open for reading: {:?}", cli.input))?;
    let header = SinHeader::from_reader(&mut reader)
        .with_context(|| format!("Failed to read SIN header: {:?}", cli.input))?;

    display_header(sin_cli, &header);

    let len = reader
        .seek(SeekFrom::End(0))
        .with_context(|| format!("Failed to get file size: {:?}", cli.input))?;
    if let Err(e) = header.check_bounds(len) {
        warning!("{e}");
    }

    Ok(())
}

fn extract_subcommand(sin_cli: &SinCli, cli: &ExtractCli) -> Result<()> {
    let header = sin::decode(&cli.input, &cli.output)
        .with_context(|| format!("Failed to decode SIN container: {:?}", cli.input))?;

    display_header(sin_cli, &header);

    if !sin_cli.quiet {
        status!("Extracted image to {:?}", cli.output);
    }

    Ok(())
}

fn pack_subcommand(sin_cli: &SinCli, cli: &PackCli) -> Result<()> {
    let reader = File::open(&cli.input)
        .with_context(|| format!("Failed to open for reading: {:?}", cli.input))?;
    let image_size = reader
        .metadata()
        .with_context(|| format!("Failed to get file size: {:?}", cli.input))?
        .len();

    let header = SinHeader::for_image(cli.partition_id, cli.uuid, image_size);

    let writer = File::create(&cli.output)
        .with_context(|| format!("Failed to open for writing: {:?}", cli.output))?;
    let mut writer = BufWriter::new(writer);

    sin::write_container(&mut writer, &header, BufReader::new(reader))
        .with_context(|| format!("Failed to write SIN container: {:?}", cli.output))?;
    writer
        .flush()
        .with_context(|| format!("Failed to flush writes: {:?}", cli.output))?;

    display_header(sin_cli, &header);

    Ok(())
}

pub fn sin_main(cli: &SinCli) -> Result<()> {
    match &cli.command {
        SinCommand::Info(c) => info_subcommand(cli, c),
        SinCommand::Extract(c) => extract_subcommand(cli, c),
        SinCommand::Pack(c) => pack_subcommand(cli, c),
    }
}

/// Display SIN container header information.
#[derive(Debug, Parser)]
struct InfoCli {
    /// Path to input SIN container.
    #[arg(short, long, value_name = "FILE", value_parser)]
    input: PathBuf,
}

/// Extract the raw partition image from a SIN container.
#[derive(Debug, Parser)]
struct ExtractCli {
    /// Path to input SIN container.
    #[arg(short, long, value_name = "FILE", value_parser)]
    input: PathBuf,

    /// Path to output raw image.
    #[arg(short, long, value_name = "FILE", value_parser)]
    output: PathBuf,
}

/// Pack a raw partition image into a SIN container.
///
/// The opaque hash tables of vendor-built containers are not generated. The
/// output is only suitable for tools that read the fixed header.
#[derive(Debug, Parser)]
struct PackCli {
    /// Path to input raw image.
    #[arg(short, long, value_name = "FILE", value_parser)]
    input: PathBuf,

    /// Path to output SIN container.
    #[arg(short, long, value_name = "FILE", value_parser)]
    output: PathBuf,

    /// Partition UUID (32 hex digits, dashes optional).
    #[arg(long, value_name = "UUID", value_parser)]
    uuid: Option<PartitionUuid>,

    /// Partition identifier.
    #[arg(long, value_name = "ID", default_value_t = 0)]
    partition_id: u32,
}

#[derive(Debug, Subcommand)]
enum SinCommand {
    Info(InfoCli),
    Extract(ExtractCli),
    Pack(PackCli),
}

/// Inspect, extract, or create SIN containers.
#[derive(Debug, Parser)]
pub struct SinCli {
    #[command(subcommand)]
    command: SinCommand,

    /// Don't print SIN header information.
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Print SIN header information in debug format.
    #[arg(short, long, global = true)]
    debug: bool,
}
