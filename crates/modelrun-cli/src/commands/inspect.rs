use std::path::Path;

use anyhow::{Context, Result};

use modelrun_engine::archive;
use modelrun_types::StageRecord;

/// Execute the `inspect` command: print the stages recorded in an archive
/// without unpacking it.
pub fn execute(archive_path: &Path, json: bool) -> Result<()> {
    let records = archive::read_packed_manifest(archive_path)
        .with_context(|| format!("Failed to read archive: {}", archive_path.display()))?;

    if json {
        println!("{}", serde_json::to_string_pretty(&records)?);
        return Ok(());
    }

    println!("Archive '{}'", archive_path.display());
    println!("  Stages recorded: {}", records.len());
    for (i, record) in records.iter().enumerate() {
        print_record(i + 1, record);
    }
    Ok(())
}

fn print_record(position: usize, record: &StageRecord) {
    let embedded = record
        .input_files
        .iter()
        .filter(|f| f.is_embeddable())
        .count();
    println!("    {position:>2}. {}", record.name);
    println!("        Command:   {}", record.command);
    println!("        Work dir:  {}", record.work_dir);
    if record.mpi_use {
        println!(
            "        MPI:       {} x{}",
            record.mpi_launcher.as_deref().unwrap_or("mpirun"),
            record.mpi_cores.unwrap_or(0)
        );
    }
    println!(
        "        Files:     {} in ({embedded} data), {} out",
        record.input_files.len(),
        record.output_files.len()
    );
}
