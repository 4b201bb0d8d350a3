//! Fixtures shared by the unit tests: a small deck and shell scripts standing
//! in for the simulator executables.

use std::{
    fs,
    path::{Path, PathBuf},
};

use crate::{
    config::{ExecutableConfig, SessionConfig},
    policy::PolicyConfig,
};

pub const SAMPLE_DECK: &str = "\
* two-room pressure model
TEND 0
CV001 PVOL 100.0
CV002 PVOL 50.0
CF10100 'OVERPRESSURE' MULTIPLY 2 1.0
CF10110 1.0 0.0 EXEC-TIME
CF20200 'UNDERPRESSURE' MULTIPLY 2 1.0
CF20210 1.0 0.0 EXEC-TIME
EDF00100 'PRESSURES' 3 OSEQ
EDF00101 'PRESSURES.DAT'
EDF00110 TIME
EDF00111 CVH-P.1
EDF00112 CVH-P.2
.
*EOR* MELCOR
TITLE 'pressure control'
.
";

/// Writes the sample deck into `dir`.
pub fn write_deck(dir: &Path) -> PathBuf {
    let path = dir.join("pressure.inp");
    fs::write(&path, SAMPLE_DECK).unwrap();
    path
}

/// Initialization script: echoes, checks the deck exists, drops a restart file.
pub fn write_initialize_script(dir: &Path) -> PathBuf {
    let path = dir.join("init.sh");
    fs::write(
        &path,
        "echo \"generating initial state from $1\"\n\
         test -f \"$1\" || exit 3\n\
         : > MELRST\n",
    )
    .unwrap();
    path
}

/// Initialization script that also writes the first output record.
pub fn write_seeding_initialize_script(dir: &Path, values: &[f64]) -> PathBuf {
    let path = dir.join("init_seed.sh");
    let row: Vec<String> = values.iter().map(ToString::to_string).collect();
    fs::write(
        &path,
        format!(
            "test -f \"$1\" || exit 3\n\
             echo \"0 {}\" > PRESSURES.DAT\n",
            row.join(" ")
        ),
    )
    .unwrap();
    path
}

/// Advance script: appends one record `TEND values...` to `PRESSURES.DAT`.
pub fn write_advance_script(dir: &Path, values: &[f64]) -> PathBuf {
    let path = dir.join("advance.sh");
    let row: Vec<String> = values.iter().map(ToString::to_string).collect();
    fs::write(
        &path,
        format!(
            "deck=\"${{2#i=}}\"\n\
             tend=$(awk '$1 == \"TEND\" {{ print $2 }}' \"$deck\")\n\
             echo \"advancing to $tend\"\n\
             echo \"$tend {}\" >> PRESSURES.DAT\n\
             : > MELPTF\n",
            row.join(" ")
        ),
    )
    .unwrap();
    path
}

/// Script that always fails with the given exit code.
pub fn write_failing_script(dir: &Path, code: i32) -> PathBuf {
    let path = dir.join(format!("fail_{code}.sh"));
    fs::write(&path, format!("echo boom >&2\nexit {code}\n")).unwrap();
    path
}

/// Runs a script through `/bin/sh` so tests never exec freshly written files.
pub fn shell(script: &Path, args: &[&str]) -> ExecutableConfig {
    let mut all = vec![script.display().to_string()];
    all.extend(args.iter().map(|arg| (*arg).to_string()));
    ExecutableConfig {
        path: PathBuf::from("/bin/sh"),
        args: all,
    }
}

/// Session config wired to the sample deck and fake simulator.
pub fn sample_config(dir: &Path, values: &[f64]) -> SessionConfig {
    let deck = write_deck(dir);
    let init = write_initialize_script(dir);
    let advance = write_advance_script(dir, values);
    let mut config = SessionConfig::new(
        deck,
        shell(&init, &["{deck}"]),
        shell(&advance, &["ow=o", "i={deck}"]),
        vec!["CF101".into(), "CF202".into()],
    );
    config.session.output_root = dir.join("out");
    config.session.session_id = Some("sample".into());
    config.session.control_horizon = 10.0;
    config.policy = PolicyConfig::Deviation {
        max_deviation: 5.0,
        warmup_time: 0.0,
        max_episode_len: 100.0,
    };
    config
}
