// SPDX-FileCopyrightText: 2026 Andrew Gunnerson
// SPDX-License-Identifier: GPL-3.0-only

use std::{
    fs::{self, File},
    io::{Cursor, Read},
    path::{Path, PathBuf},
    sync::{
        Mutex,
        atomic::{AtomicBool, Ordering},
    },
};

use ::zip::{CompressionMethod, ZipArchive};
use prfcreator::{
    config::Config,
    format::{
        sin::{self, PartitionUuid, SinHeader},
        zip,
    },
    patch::script,
    pipeline::{self, Event, EventSink, Outcome, Pipeline, steps},
};
use tempfile::TempDir;

const FIRMWARE_NAME: &str = "C6603_10.7.A.0.222";
const UUID: [u8; 16] = *b"\x3b\x6f\x1e\x91\x5c\x0a\x4e\x2d\x8f\x77\x10\x42\xa6\xd9\x0c\x55";
const UUID_STR: &str = "3b6f1e91-5c0a-4e2d-8f77-1042a6d90c55";

struct Env {
    dir: TempDir,
    image: Vec<u8>,
}

impl Env {
    fn new(uuid: Option<[u8; 16]>, extra_entries: &[&str]) -> Self {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir(dir.path().join("scratch")).unwrap();
        fs::create_dir(dir.path().join("inputs")).unwrap();

        let image = (0..50_000u32).map(|i| (i % 239) as u8).collect::<Vec<_>>();
        let header = SinHeader::for_image(0x0c, uuid.map(PartitionUuid), image.len() as u64);
        let container = dir.path().join("inputs/system.sin");
        let mut data = vec![];
        sin::write_container(&mut data, &header, Cursor::new(&image)).unwrap();
        fs::write(&container, data).unwrap();

        let env = Self { dir, image };
        let firmware = env.firmware();
        zip::add_entry(&firmware, &container, "system.sin", true).unwrap();

        for name in extra_entries {
            let path = env.input(name, name.as_bytes());
            zip::add_entry(&firmware, &path, name, true).unwrap();
        }

        env
    }

    fn path(&self, name: &str) -> PathBuf {
        self.dir.path().join(name)
    }

    fn firmware(&self) -> PathBuf {
        self.path(&format!("inputs/{FIRMWARE_NAME}.ftf"))
    }

    fn input(&self, name: &str, data: &[u8]) -> PathBuf {
        let path = self.path("inputs").join(name);
        fs::write(&path, data).unwrap();
        path
    }

    fn config(&self) -> Config {
        Config {
            firmware: self.firmware(),
            output_dir: self.path("out"),
            scratch_dir: self.path("scratch"),
            min_free_space_mb: 0,
            ..Default::default()
        }
    }

    fn scratch_is_empty(&self) -> bool {
        fs::read_dir(self.path("scratch")).unwrap().next().is_none()
    }
}

/// Records all events. Optionally requests cancellation once a given step has
/// finished.
#[derive(Default)]
struct RecordingSink<'a> {
    events: Mutex<Vec<Event>>,
    cancel_after: Option<(&'static str, &'a AtomicBool)>,
}

impl EventSink for RecordingSink<'_> {
    fn send(&self, event: Event) {
        if let (Event::Progress { step, .. }, Some((target, signal))) = (&event, self.cancel_after)
        {
            if *step == target {
                signal.store(true, Ordering::SeqCst);
            }
        }

        self.events.lock().unwrap().push(event);
    }
}

impl RecordingSink<'_> {
    fn events(&self) -> Vec<Event> {
        self.events.lock().unwrap().clone()
    }

    fn progress(&self) -> Vec<(usize, usize, &'static str)> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                Event::Progress {
                    index, total, step, ..
                } => Some((index, total, step)),
                _ => None,
            })
            .collect()
    }

    fn warnings(&self) -> Vec<String> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                Event::Warning(m) => Some(m),
                _ => None,
            })
            .collect()
    }
}

fn run(config: &Config, sink: &RecordingSink<'_>, cancel_signal: &AtomicBool) -> Outcome {
    let outcome = Pipeline::new(config).run(cancel_signal, sink);

    assert_eq!(sink.events().last(), Some(&Event::Finished(outcome.clone())));

    outcome
}

fn read_entry(archive: &Path, name: &str) -> Vec<u8> {
    let mut zip = ZipArchive::new(File::open(archive).unwrap()).unwrap();
    let mut entry = zip.by_name(name).unwrap();
    let mut data = vec![];
    entry.read_to_end(&mut data).unwrap();
    data
}

fn read_script(archive: &Path) -> String {
    String::from_utf8(read_entry(archive, steps::SCRIPT_ENTRY)).unwrap()
}

#[test]
fn mandatory_steps_only() {
    let env = Env::new(Some(UUID), &[]);
    let config = env.config();
    let sink = RecordingSink::default();

    let outcome = run(&config, &sink, &AtomicBool::new(false));
    let artifact = env.path("out/flashable-prerooted.zip");
    assert_eq!(outcome, Outcome::Completed { artifact: artifact.clone() });

    assert_eq!(
        zip::entry_names(&artifact).unwrap(),
        [steps::SCRIPT_ENTRY, steps::IMAGE_ENTRY],
    );
    assert_eq!(read_entry(&artifact, steps::IMAGE_ENTRY), env.image);

    let script = read_script(&artifact);
    let padded = format!("{FIRMWARE_NAME:<width$}", width = script::FIELD_WIDTH);
    assert!(script.contains(&format!("\"  {padded}\")")));
    assert!(script.contains(&format!("/dev/block/by-uuid/{UUID_STR}\"")));
    assert!(!script.contains(script::FIRMWARE_TOKEN));
    assert!(!script.contains(script::UUID_TOKEN));

    assert_eq!(
        sink.progress(),
        [
            (1, 5, "unpack"),
            (2, 5, "decode"),
            (3, 5, "patch-script"),
            (4, 5, "add-image"),
            (5, 5, "finalize"),
        ],
    );
    let percents = sink
        .events()
        .into_iter()
        .filter_map(|e| match e {
            Event::Progress { percent, .. } => Some(percent),
            _ => None,
        })
        .collect::<Vec<_>>();
    assert_eq!(percents, [20, 40, 60, 80, 100]);

    assert!(!config.intermediate_path().exists());
    assert!(!config.signed_path().exists());
    assert!(env.scratch_is_empty());
    assert!(sink.warnings().is_empty());
}

#[test]
fn absent_uuid_flashes_by_name() {
    for fill in [0x00u8, 0xff] {
        let env = Env::new(Some([fill; 16]), &[]);
        let config = env.config();
        let sink = RecordingSink::default();

        let outcome = run(&config, &sink, &AtomicBool::new(false));
        let Outcome::Completed { artifact } = outcome else {
            panic!("Unexpected outcome: {outcome:?}");
        };

        let script = read_script(&artifact);
        assert!(script.contains(&format!(
            "package_extract_file(\"system.ext4\", \"{}\");",
            script::BY_NAME_DEVICE,
        )));
        assert!(!script.contains(script::UUID_TOKEN));
        assert!(!script.contains(script::FIRMWARE_TOKEN));

        let warnings = sink.warnings();
        assert_eq!(warnings.len(), 1);
        assert!(warnings[0].contains(script::BY_NAME_DEVICE));
    }
}

#[test]
fn absent_uuid_with_custom_script() {
    let env = Env::new(None, &[]);
    let config = Config {
        script: Some(env.input(
            "custom-script",
            format!("ui_print(\"{}\");\n# {}\n", script::FIRMWARE_TOKEN, script::UUID_TOKEN)
                .as_bytes(),
        )),
        ..env.config()
    };
    let sink = RecordingSink::default();

    let outcome = run(&config, &sink, &AtomicBool::new(false));
    let Outcome::Completed { artifact } = outcome else {
        panic!("Unexpected outcome: {outcome:?}");
    };

    assert!(read_script(&artifact).contains(script::UUID_TOKEN));
    let warnings = sink.warnings();
    assert_eq!(warnings.len(), 1);
    assert!(warnings[0].contains("left in custom script"));
}

#[test]
fn plan_size_matches_predicates() {
    let env = Env::new(Some(UUID), &["kernel.sin"]);
    let config = Config {
        include: vec!["Kernel".into(), "modem".into()],
        extra_flashables: vec![env.input("extra-a.zip", b"aaaa"), env.input("b.zip", b"bb")],
        su: Some(env.input("UPDATE-SuperSU-v2.46.zip", b"su")),
        recovery: Some(env.input("recovery.zip", b"recovery")),
        script: Some(env.input(
            "custom-script",
            format!("ui_print(\"{}\");\n# {}\n", script::FIRMWARE_TOKEN, script::UUID_TOKEN)
                .as_bytes(),
        )),
        ..env.config()
    };

    let pipeline = Pipeline::new(&config);
    assert_eq!(pipeline.total(), 9);
    assert!(pipeline.plan().iter().all(|s| s.name != "sign"));

    let sink = RecordingSink::default();
    let outcome = pipeline.run(&AtomicBool::new(false), &sink);
    let Outcome::Completed { artifact } = outcome else {
        panic!("Unexpected outcome: {outcome:?}");
    };

    let progress = sink.progress();
    assert_eq!(progress.len(), 9);
    assert!(progress.iter().enumerate().all(|(i, p)| p.0 == i + 1 && p.1 == 9));

    assert_eq!(
        zip::entry_names(&artifact).unwrap(),
        [
            steps::SCRIPT_ENTRY,
            steps::IMAGE_ENTRY,
            "files/kernel.sin",
            "extra/extra-a.zip",
            "extra/b.zip",
            steps::SU_ENTRY,
            steps::RECOVERY_ENTRY,
        ],
    );
    assert_eq!(read_entry(&artifact, "files/kernel.sin"), b"kernel.sin");
    assert_eq!(read_entry(&artifact, steps::SU_ENTRY), b"su");

    let mut zip = ZipArchive::new(File::open(&artifact).unwrap()).unwrap();
    for name in ["extra/b.zip", steps::SU_ENTRY] {
        assert_eq!(
            zip.by_name(name).unwrap().compression(),
            CompressionMethod::Stored,
        );
    }

    let script = read_script(&artifact);
    assert!(script.starts_with(&format!("ui_print(\"{FIRMWARE_NAME} ")));
    assert!(script.contains(&format!("# {UUID_STR}\n")));

    // modem.sin is not in the firmware.
    let warnings = sink.warnings();
    assert_eq!(warnings.len(), 1);
    assert!(warnings[0].contains("modem.sin"));

    // Inputs are never consumed.
    assert!(config.su.as_ref().unwrap().exists());
    assert!(env.scratch_is_empty());
}

#[test]
fn missing_recovery_is_skipped() {
    let env = Env::new(Some(UUID), &[]);
    let config = Config {
        recovery: Some(env.path("inputs/missing-recovery.zip")),
        ..env.config()
    };

    let sink = RecordingSink::default();
    let outcome = run(&config, &sink, &AtomicBool::new(false));
    let Outcome::Completed { artifact } = outcome else {
        panic!("Unexpected outcome: {outcome:?}");
    };

    assert_eq!(sink.progress().len(), 5);
    assert!(!zip::entry_exists(&artifact, steps::RECOVERY_ENTRY).unwrap());
}

#[test]
fn cancel_before_each_step() {
    let env = Env::new(Some(UUID), &[]);
    let config = Config {
        su: Some(env.input("su.zip", b"su")),
        ..env.config()
    };
    let plan = Pipeline::new(&config)
        .plan()
        .iter()
        .map(|s| s.name)
        .collect::<Vec<_>>();

    // Cancel before step k by cancelling once step k - 1 reports progress.
    for k in 2..=plan.len() {
        let cancel_signal = AtomicBool::new(false);
        let sink = RecordingSink {
            cancel_after: Some((plan[k - 2], &cancel_signal)),
            ..Default::default()
        };

        let outcome = run(&config, &sink, &cancel_signal);
        assert_eq!(outcome, Outcome::Cancelled, "k = {k}");

        let progress = sink.progress();
        assert_eq!(progress.len(), k - 1, "k = {k}");
        assert_eq!(progress.last().unwrap().2, plan[k - 2]);

        assert!(sink.events().contains(&Event::Log("Cancelled".into())));
        assert!(!config.intermediate_path().exists());
        assert!(!config.final_path().exists());
        assert!(env.scratch_is_empty());
    }

    let sink = RecordingSink::default();
    assert_eq!(run(&config, &sink, &AtomicBool::new(true)), Outcome::Cancelled);
    assert!(sink.progress().is_empty());
}

#[test]
fn cancel_keeps_partial_output() {
    let env = Env::new(Some(UUID), &[]);
    let config = Config {
        keep_partial_output: true,
        ..env.config()
    };

    let cancel_signal = AtomicBool::new(false);
    let sink = RecordingSink {
        cancel_after: Some(("add-image", &cancel_signal)),
        ..Default::default()
    };

    assert_eq!(run(&config, &sink, &cancel_signal), Outcome::Cancelled);
    assert_eq!(
        zip::entry_names(&config.intermediate_path()).unwrap(),
        [steps::SCRIPT_ENTRY, steps::IMAGE_ENTRY],
    );
    assert!(!config.final_path().exists());
}

#[test]
fn preflight_failures_have_no_side_effects() {
    let env = Env::new(Some(UUID), &[]);

    #[cfg(unix)]
    {
        let config = Config {
            min_free_space_mb: u64::MAX,
            ..env.config()
        };
        let sink = RecordingSink::default();

        let outcome = run(&config, &sink, &AtomicBool::new(false));
        assert!(matches!(&outcome, Outcome::Failed(m) if m.contains("free space")));
        assert!(sink.progress().is_empty());
        assert!(!config.output_dir.exists());
    }

    let firmware = env.path("inputs/empty.ftf");
    zip::add_entry(&firmware, &env.input("kernel.sin", b"k"), "kernel.sin", true).unwrap();
    let config = Config {
        firmware,
        ..env.config()
    };
    let sink = RecordingSink::default();

    let outcome = run(&config, &sink, &AtomicBool::new(false));
    assert!(matches!(&outcome, Outcome::Failed(m) if m.contains("system.sin")));
    assert!(sink.progress().is_empty());
    assert!(!config.output_dir.exists());
    assert!(env.scratch_is_empty());
}

#[test]
fn malformed_container_fails() {
    let env = Env::new(Some(UUID), &[]);
    let firmware = env.path("inputs/bad.ftf");
    zip::add_entry(
        &firmware,
        &env.input("system.sin", b"\x03SIN garbage"),
        "system.sin",
        true,
    )
    .unwrap();
    let config = Config {
        firmware,
        ..env.config()
    };
    let sink = RecordingSink::default();

    let outcome = run(&config, &sink, &AtomicBool::new(false));
    assert!(matches!(&outcome, Outcome::Failed(m) if m.starts_with("decode: Malformed")));
    assert_eq!(sink.progress().len(), 1);
    assert!(!config.final_path().exists());
    assert!(env.scratch_is_empty());
}

#[test]
fn unknown_extra_file_is_fatal() {
    let env = Env::new(Some(UUID), &[]);
    let config = Config {
        include: vec!["bootloader".into()],
        ..env.config()
    };
    let sink = RecordingSink::default();

    let outcome = run(&config, &sink, &AtomicBool::new(false));
    assert!(matches!(&outcome, Outcome::Failed(m) if m.contains("bootloader")));
    assert_eq!(sink.progress().len(), 4);
    assert!(!config.intermediate_path().exists());
    assert!(!config.final_path().exists());
}

#[test]
fn missing_signing_tool_completes_unsigned() {
    let env = Env::new(Some(UUID), &[]);
    let config = Config {
        sign: true,
        signing: prfcreator::sign::SigningSettings {
            java: env.path("inputs/no-such-java"),
            jar: env.path("inputs/no-such-signapk.jar"),
            ..Default::default()
        },
        ..env.config()
    };
    let sink = RecordingSink::default();

    // Left over from an earlier run that signed successfully.
    fs::create_dir_all(&config.output_dir).unwrap();
    fs::write(config.signed_path(), b"stale").unwrap();

    let outcome = run(&config, &sink, &AtomicBool::new(false));
    assert_eq!(
        outcome,
        Outcome::Completed {
            artifact: config.final_path(),
        },
    );
    assert_eq!(sink.progress().len(), 6);
    assert_eq!(sink.warnings().len(), 1);
    assert!(sink.warnings()[0].starts_with("sign: "));
    assert!(!config.signed_path().exists());
}

#[cfg(unix)]
mod fake_java {
    use std::os::unix::fs::PermissionsExt;

    use prfcreator::sign::SigningSettings;

    use super::*;

    /// Stand-in for `java` that accepts `-version` and copies the input to the
    /// output if the key material exists.
    fn fake_java(env: &Env, sign_status: u8) -> PathBuf {
        let script = format!(
            "#!/bin/sh\n\
             if [ \"$1\" = -version ]; then echo 'openjdk version \"fake\"' >&2; exit 0; fi\n\
             [ \"$1\" = -Xmx1024m ] && [ \"$4\" = -w ] || exit 3\n\
             [ -s \"$5\" ] && [ -s \"$6\" ] || exit 4\n\
             [ {sign_status} -eq 0 ] || {{ echo partial > \"$8\"; exit {sign_status}; }}\n\
             cp \"$7\" \"$8\"\n"
        );
        let path = env.input("java", script.as_bytes());
        fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    fn signing_config(env: &Env, java: PathBuf) -> Config {
        Config {
            sign: true,
            signing: SigningSettings {
                java,
                jar: env.input("signapk.jar", b""),
                ..Default::default()
            },
            ..env.config()
        }
    }

    #[test]
    fn signed_artifact() {
        let env = Env::new(Some(UUID), &[]);
        let config = signing_config(&env, fake_java(&env, 0));
        let sink = RecordingSink::default();

        let outcome = run(&config, &sink, &AtomicBool::new(false));
        assert_eq!(
            outcome,
            Outcome::Completed {
                artifact: config.signed_path(),
            },
        );
        assert!(sink.warnings().is_empty());
        assert!(!config.intermediate_path().exists());
        assert!(!config.final_path().exists());
        assert_eq!(
            read_entry(&config.signed_path(), steps::IMAGE_ENTRY),
            env.image
        );
        assert!(env.scratch_is_empty());
    }

    #[test]
    fn missing_jar_completes_unsigned() {
        let env = Env::new(Some(UUID), &[]);
        let jar = env.path("inputs/no-such-signapk.jar");
        let config = Config {
            sign: true,
            signing: SigningSettings {
                java: fake_java(&env, 0),
                jar: jar.clone(),
                ..Default::default()
            },
            ..env.config()
        };
        let sink = RecordingSink::default();

        let outcome = run(&config, &sink, &AtomicBool::new(false));
        assert_eq!(
            outcome,
            Outcome::Completed {
                artifact: config.final_path(),
            },
        );

        let warnings = sink.warnings();
        assert_eq!(warnings.len(), 1);
        assert!(warnings[0].starts_with("sign: "));
        assert!(warnings[0].contains(&format!("{jar:?}")));
        assert!(!config.signed_path().exists());
        assert!(env.scratch_is_empty());
    }

    #[test]
    fn signing_failure_keeps_unsigned() {
        let env = Env::new(Some(UUID), &[]);
        let config = signing_config(&env, fake_java(&env, 1));
        let sink = RecordingSink::default();

        let outcome = run(&config, &sink, &AtomicBool::new(false));
        assert_eq!(
            outcome,
            Outcome::Completed {
                artifact: config.final_path(),
            },
        );
        assert_eq!(sink.warnings().len(), 1);
        assert!(!config.signed_path().exists());
        assert_eq!(
            read_entry(&config.final_path(), steps::IMAGE_ENTRY),
            env.image
        );
    }

    #[test]
    fn user_keys() {
        let env = Env::new(Some(UUID), &[]);
        let data = Path::new(env!("CARGO_MANIFEST_DIR")).join("tests/data");
        let mut config = signing_config(&env, fake_java(&env, 0));
        config.signing.key = Some(data.join("user.key"));
        config.signing.cert = Some(data.join("user.crt"));
        config.signing.pass_file = Some(env.input("pass", b"prfcreator\n"));

        let sink = RecordingSink::default();
        let outcome = run(&config, &sink, &AtomicBool::new(false));
        assert_eq!(
            outcome,
            Outcome::Completed {
                artifact: config.signed_path(),
            },
        );

        config.signing.pass_file = Some(env.input("pass", b"wrong\n"));
        let sink = RecordingSink::default();
        let outcome = run(&config, &sink, &AtomicBool::new(false));
        assert_eq!(
            outcome,
            Outcome::Completed {
                artifact: config.final_path(),
            },
        );
        assert_eq!(sink.warnings().len(), 1);
    }
}

#[test]
fn background_run() {
    let env = Env::new(None, &[]);
    let config = env.config();
    let final_path = config.final_path();

    let handle = pipeline::spawn(config, Default::default()).unwrap();
    let events = handle.events().iter().collect::<Vec<_>>();
    let outcome = handle.join();

    assert_eq!(
        outcome,
        Outcome::Completed {
            artifact: final_path,
        },
    );
    assert_eq!(events.last(), Some(&Event::Finished(outcome)));
    assert_eq!(
        events
            .iter()
            .filter(|e| matches!(e, Event::Progress { .. }))
            .count(),
        5,
    );
}
