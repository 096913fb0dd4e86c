// SPDX-FileCopyrightText: 2026 Andrew Gunnerson
// SPDX-License-Identifier: GPL-3.0-only

use std::{fmt, fs, path::Path};

use phf::phf_map;

use crate::{
    config::Config,
    format::{
        sin,
        zip::{self, ArchiveEntry},
    },
    patch::script,
    pipeline::{
        SYSTEM_CONTAINER,
        context::Context,
        error::{Error, Result},
    },
    sign,
};

pub const SCRIPT_ENTRY: &str = "META-INF/com/google/android/updater-script";
pub const IMAGE_ENTRY: &str = "system.ext4";
pub const EXTRA_FILES_DIR: &str = "files";
pub const EXTRA_FLASHABLES_DIR: &str = "extra";
pub const SU_ENTRY: &str = "SuperSU.zip";
pub const RECOVERY_ENTRY: &str = "dualrecovery.zip";

/// Extra firmware files that can be bundled into the package, keyed by their
/// lowercase checklist name.
pub static EXTRA_FILES: phf::Map<&'static str, &'static str> = phf_map! {
    "kernel" => "kernel.sin",
    "fotakernel" => "fotakernel.sin",
    "ltalabel" => "ltalabel.sin",
    "modem" => "modem.sin",
    "baseband" => "baseband.sin",
};

/// A single unit of work in the pipeline.
pub struct Step {
    pub name: &'static str,
    /// Whether the step runs for a given config. This is evaluated once,
    /// before the run starts.
    pub applicable: fn(&Config) -> bool,
    pub action: fn(&mut Context<'_>) -> Result<()>,
}

impl fmt::Debug for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Step")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

fn always(_config: &Config) -> bool {
    true
}

fn has_extras(config: &Config) -> bool {
    !config.include.is_empty()
}

fn has_extra_flashables(config: &Config) -> bool {
    !config.extra_flashables.is_empty()
}

fn has_su(config: &Config) -> bool {
    config.su.is_some()
}

fn wants_signing(config: &Config) -> bool {
    config.sign
}

/// All steps, in execution order.
pub static STEPS: [Step; 10] = [
    Step {
        name: "unpack",
        applicable: always,
        action: unpack,
    },
    Step {
        name: "decode",
        applicable: always,
        action: decode,
    },
    Step {
        name: "patch-script",
        applicable: always,
        action: patch_script,
    },
    Step {
        name: "add-image",
        applicable: always,
        action: add_image,
    },
    Step {
        name: "add-extras",
        applicable: has_extras,
        action: add_extras,
    },
    Step {
        name: "add-extra-flashables",
        applicable: has_extra_flashables,
        action: add_extra_flashables,
    },
    Step {
        name: "add-su",
        applicable: has_su,
        action: add_su,
    },
    Step {
        name: "add-recovery",
        applicable: Config::has_recovery,
        action: add_recovery,
    },
    Step {
        name: "sign",
        applicable: wants_signing,
        action: sign_archive,
    },
    Step {
        name: "finalize",
        applicable: always,
        action: finalize,
    },
];

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.to_string_lossy().into_owned())
}

fn unpack(ctx: &mut Context<'_>) -> Result<()> {
    let firmware = &ctx.config.firmware;

    ctx.log(format!(
        "Extracting {SYSTEM_CONTAINER} from {}",
        file_name(firmware),
    ));

    let path = zip::extract_entry(firmware, SYSTEM_CONTAINER, ctx.scratch_dir())?;
    ctx.container = Some(path);

    Ok(())
}

fn decode(ctx: &mut Context<'_>) -> Result<()> {
    let Some(container) = ctx.container.take() else {
        return Err(Error::MissingEntry {
            archive: ctx.config.firmware.clone(),
            name: SYSTEM_CONTAINER.to_owned(),
        });
    };
    let image = ctx.scratch_dir().join(IMAGE_ENTRY);

    ctx.log(format!("Decoding {SYSTEM_CONTAINER} to {IMAGE_ENTRY}"));

    let header =
        sin::decode(&container, &image).map_err(|e| Error::from_container(container.clone(), e))?;
    fs::remove_file(&container).map_err(|e| Error::Io(container.clone(), e))?;

    match header.uuid {
        Some(uuid) => ctx.log(format!("System partition UUID: {uuid}")),
        None => ctx.log("System partition has no UUID"),
    }

    ctx.uuid = header.uuid;
    ctx.image = Some(image);

    Ok(())
}

fn patch_script(ctx: &mut Context<'_>) -> Result<()> {
    let path = ctx.scratch_dir().join("updater-script");

    match &ctx.config.script {
        Some(template) => {
            fs::copy(template, &path).map_err(|e| Error::Io(template.clone(), e))?;
        }
        None => {
            fs::write(&path, script::DEFAULT_TEMPLATE).map_err(|e| Error::Io(path.clone(), e))?;
        }
    }

    ctx.log("Adding info to flashable script");

    script::patch(&path, script::FIRMWARE_TOKEN, &ctx.config.firmware_name())?;

    match ctx.uuid {
        Some(uuid) => script::replace(&path, script::UUID_TOKEN, &uuid.to_string())?,
        None => match script::replace(&path, script::UUID_DEVICE_TOKEN, script::BY_NAME_DEVICE) {
            Ok(()) => ctx.warn(format!(
                "System partition has no UUID; flashing to {}",
                script::BY_NAME_DEVICE,
            )),
            Err(script::Error::TokenNotFound(_)) => {
                ctx.warn("System partition has no UUID; UUID marker left in custom script")
            }
            Err(e) => return Err(e.into()),
        },
    }

    zip::append(
        &ctx.archive,
        &ArchiveEntry::new(SCRIPT_ENTRY, path).delete_source_after(),
    )?;

    Ok(())
}

fn add_image(ctx: &mut Context<'_>) -> Result<()> {
    let Some(image) = ctx.image.take() else {
        return Err(Error::MissingEntry {
            archive: ctx.config.firmware.clone(),
            name: SYSTEM_CONTAINER.to_owned(),
        });
    };

    ctx.log("Adding system to zip");

    zip::append(
        &ctx.archive,
        &ArchiveEntry::new(IMAGE_ENTRY, image).delete_source_after(),
    )?;

    Ok(())
}

/// Look up the firmware entry for each selected extra file. Unknown names are
/// rejected before anything is extracted.
fn resolve_extra_files(include: &[String]) -> Result<Vec<&'static str>> {
    include
        .iter()
        .map(|name| {
            EXTRA_FILES
                .get(name.to_lowercase().as_str())
                .copied()
                .ok_or_else(|| Error::UnknownExtraFile(name.clone()))
        })
        .collect()
}

fn add_extras(ctx: &mut Context<'_>) -> Result<()> {
    let entries = resolve_extra_files(&ctx.config.include)?;

    ctx.log("Adding extra files");

    for entry in entries {
        let path = match zip::extract_entry(&ctx.config.firmware, entry, ctx.scratch_dir()) {
            Ok(p) => p,
            Err(zip::Error::EntryNotFound { .. }) => {
                ctx.warn(format!("{entry} does not exist in firmware; skipping"));
                continue;
            }
            Err(e) => return Err(e.into()),
        };

        zip::append(
            &ctx.archive,
            &ArchiveEntry::new(format!("{EXTRA_FILES_DIR}/{entry}"), path).delete_source_after(),
        )?;
    }

    Ok(())
}

fn add_extra_flashables(ctx: &mut Context<'_>) -> Result<()> {
    for path in &ctx.config.extra_flashables {
        let name = file_name(path);

        ctx.log(format!("Adding {name}"));

        zip::append(
            &ctx.archive,
            &ArchiveEntry::new(format!("{EXTRA_FLASHABLES_DIR}/{name}"), path).stored(),
        )?;
    }

    Ok(())
}

fn add_su(ctx: &mut Context<'_>) -> Result<()> {
    let Some(su) = &ctx.config.su else {
        return Ok(());
    };

    ctx.log(format!("Adding {}", file_name(su)));

    zip::append(&ctx.archive, &ArchiveEntry::new(SU_ENTRY, su).stored())?;

    Ok(())
}

fn add_recovery(ctx: &mut Context<'_>) -> Result<()> {
    let Some(recovery) = &ctx.config.recovery else {
        return Ok(());
    };

    ctx.log(format!("Adding {}", file_name(recovery)));

    zip::append(
        &ctx.archive,
        &ArchiveEntry::new(RECOVERY_ENTRY, recovery).stored(),
    )?;

    Ok(())
}

fn sign_archive(ctx: &mut Context<'_>) -> Result<()> {
    ctx.log("Signing zip file");

    let signed = sign::sign(
        &ctx.config.signing,
        &ctx.archive,
        &ctx.config.signed_path(),
        ctx.scratch_dir(),
    )?;
    ctx.signed = Some(signed);

    Ok(())
}

fn finalize(ctx: &mut Context<'_>) -> Result<()> {
    if let Some(signed) = &ctx.signed {
        ctx.artifact = Some(signed.clone());
        return Ok(());
    }

    let final_path = ctx.config.final_path();
    fs::rename(&ctx.archive, &final_path).map_err(|e| Error::Io(ctx.archive.clone(), e))?;

    ctx.artifact = Some(final_path);

    Ok(())
}
