#![deny(clippy::all, warnings)]
#![allow(clippy::missing_errors_doc, clippy::must_use_candidate)]

//! Interpreter introspection, run in a child interpreter.
//!
//! Everything the install engine needs to know about a target Python
//! (version, ABI tag, path scheme, environment markers) is queried via
//! isolated `-Esc` child processes and memoized per interpreter path.

use std::collections::{BTreeMap, HashMap};
use std::env;
use std::path::PathBuf;
use std::process::Command;
use std::sync::{Mutex, OnceLock};

use anyhow::{anyhow, bail, Context, Result};
use wharf_core::{Scheme, ScriptKind};

const SYSCONFIG_VARS_ENV: &str = "WHARF_SYSCONFIG_VARS";

/// Locate a python executable: the `WHARF_PYTHON` override first, then
/// whatever `python3`/`python` resolves to on PATH.
pub fn detect_interpreter() -> Result<String> {
    if let Ok(explicit) = env::var("WHARF_PYTHON") {
        return Ok(explicit);
    }
    for candidate in ["python3", "python"] {
        if let Ok(path) = which::which(candidate) {
            return path
                .into_os_string()
                .into_string()
                .map_err(|_| anyhow!("non-utf8 interpreter path"));
        }
    }
    bail!("no python interpreter found; set WHARF_PYTHON");
}

/// Version tuple and 64-bitness of the interpreter.
pub fn version(executable: &str) -> Result<(Vec<u64>, bool)> {
    static CACHE: OnceLock<Mutex<HashMap<String, (Vec<u64>, bool)>>> = OnceLock::new();
    cached(&CACHE, executable, || {
        let stdout = query(
            executable,
            "import sys,json;print(json.dumps([sys.version_info[:3], sys.maxsize > 2 ** 32]))",
        )?;
        serde_json::from_slice(&stdout).context("unexpected version payload")
    })
}

/// ABI tag of the interpreter, e.g. `cp311`.
pub fn abi_tag(executable: &str) -> Result<String> {
    static CACHE: OnceLock<Mutex<HashMap<String, String>>> = OnceLock::new();
    cached(&CACHE, executable, || {
        let stdout = query(
            executable,
            "import json,sys,sysconfig\n\
             soabi = sysconfig.get_config_var(\"SOABI\") or \"\"\n\
             if soabi.startswith(\"cpython-\"):\n\
            \x20   tag = \"cp\" + soabi.split(\"-\")[1]\n\
             elif soabi:\n\
            \x20   tag = soabi.replace(\".\", \"_\").replace(\"-\", \"_\")\n\
             else:\n\
            \x20   tag = \"cp{}{}\".format(*sys.version_info[:2])\n\
             print(json.dumps(tag))",
        )?;
        serde_json::from_slice(&stdout).context("unexpected abi tag payload")
    })
}

/// The interpreter's `sysconfig.get_paths()` result.
pub fn sysconfig_paths(executable: &str) -> Result<BTreeMap<String, String>> {
    static CACHE: OnceLock<Mutex<HashMap<String, BTreeMap<String, String>>>> = OnceLock::new();
    cached(&CACHE, executable, || {
        let stdout = query(
            executable,
            "import sysconfig,json;print(json.dumps(sysconfig.get_paths()))",
        )?;
        serde_json::from_slice(&stdout).context("unexpected sysconfig payload")
    })
}

/// `sysconfig.get_paths()` evaluated with substitution variables, e.g.
/// to resolve a scheme rooted at an arbitrary prefix. Not cached: the
/// result depends on the variables.
pub fn sysconfig_paths_with_vars(
    executable: &str,
    vars: &BTreeMap<String, String>,
) -> Result<BTreeMap<String, String>> {
    let payload = serde_json::to_string(vars).context("failed to encode sysconfig vars")?;
    let stdout = run(Command::new(executable)
        .arg("-Esc")
        .arg(format!(
            "import os,sysconfig,json;print(json.dumps(sysconfig.get_paths(vars=json.loads(os.environ[\"{SYSCONFIG_VARS_ENV}\"]))))"
        ))
        .env(SYSCONFIG_VARS_ENV, payload))?;
    serde_json::from_slice(&stdout).context("unexpected sysconfig payload")
}

/// PEP 508 environment markers of the interpreter.
pub fn pep508_environment(executable: &str) -> Result<BTreeMap<String, String>> {
    static CACHE: OnceLock<Mutex<HashMap<String, BTreeMap<String, String>>>> = OnceLock::new();
    cached(&CACHE, executable, || {
        let stdout = query(
            executable,
            "import json,os,platform,sys\n\
             def format_full_version(info):\n\
            \x20   version = \"{0.major}.{0.minor}.{0.micro}\".format(info)\n\
            \x20   kind = info.releaselevel\n\
            \x20   if kind != \"final\":\n\
            \x20       version += kind[0] + str(info.serial)\n\
            \x20   return version\n\
             if hasattr(sys, \"implementation\"):\n\
            \x20   implementation_version = format_full_version(sys.implementation.version)\n\
            \x20   implementation_name = sys.implementation.name\n\
             else:\n\
            \x20   implementation_version = \"0\"\n\
            \x20   implementation_name = \"\"\n\
             env = {\n\
            \x20   \"implementation_name\": implementation_name,\n\
            \x20   \"implementation_version\": implementation_version,\n\
            \x20   \"os_name\": os.name,\n\
            \x20   \"platform_machine\": platform.machine(),\n\
            \x20   \"platform_release\": platform.release(),\n\
            \x20   \"platform_system\": platform.system(),\n\
            \x20   \"platform_version\": platform.version(),\n\
            \x20   \"python_full_version\": platform.python_version(),\n\
            \x20   \"platform_python_implementation\": platform.python_implementation(),\n\
            \x20   \"python_version\": \".\".join(platform.python_version_tuple()[:2]),\n\
            \x20   \"sys_platform\": sys.platform,\n\
             }\n\
             print(json.dumps(env))",
        )?;
        serde_json::from_slice(&stdout).context("unexpected marker payload")
    })
}

/// The interpreter's default path scheme, shaped for the installer.
///
/// `headers` follows the `include` root and `prefix` the `data` root,
/// which is `sys.prefix` under every stock sysconfig scheme.
pub fn environment_scheme(executable: &str) -> Result<Scheme> {
    let paths = sysconfig_paths(executable)?;
    let get = |key: &str| {
        paths
            .get(key)
            .map(PathBuf::from)
            .ok_or_else(|| anyhow!("sysconfig paths are missing {key}"))
    };
    Ok(Scheme {
        purelib: get("purelib")?,
        platlib: get("platlib")?,
        scripts: get("scripts")?,
        data: get("data")?,
        headers: get("include")?,
        prefix: get("data")?,
    })
}

/// Launcher convention for scripts generated against this interpreter.
pub fn script_kind(executable: &str) -> Result<ScriptKind> {
    if !cfg!(windows) {
        return Ok(ScriptKind::Posix);
    }
    let (_, is_64bit) = version(executable)?;
    Ok(if is_64bit {
        ScriptKind::WinAmd64
    } else {
        ScriptKind::WinIa32
    })
}

fn query(executable: &str, code: &str) -> Result<Vec<u8>> {
    run(Command::new(executable).arg("-Esc").arg(code))
}

fn run(command: &mut Command) -> Result<Vec<u8>> {
    let output = command
        .output()
        .with_context(|| format!("failed to run {:?}", command.get_program()))?;
    if !output.status.success() {
        bail!(
            "interpreter query failed ({}): {}",
            output.status,
            String::from_utf8_lossy(&output.stderr).trim()
        );
    }
    Ok(output.stdout)
}

fn cached<T: Clone>(
    cache: &'static OnceLock<Mutex<HashMap<String, T>>>,
    executable: &str,
    compute: impl FnOnce() -> Result<T>,
) -> Result<T> {
    let map = cache.get_or_init(|| Mutex::new(HashMap::new()));
    if let Some(hit) = map
        .lock()
        .ok()
        .and_then(|guard| guard.get(executable).cloned())
    {
        return Ok(hit);
    }
    let value = compute()?;
    if let Ok(mut guard) = map.lock() {
        guard.insert(executable.to_string(), value.clone());
    }
    Ok(value)
}
