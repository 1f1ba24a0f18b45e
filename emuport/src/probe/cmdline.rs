//! Emulator command-line inspection.
//!
//! An emulator forwarding a port names it in its arguments
//! (`hostfwd=tcp::2222-:22`, `-vnc :1`) well before its listening socket
//! becomes visible. Scanning the arguments closes that window.

use std::collections::BTreeSet;

use sysinfo::System;

/// First TCP port of VNC display numbering: display `N` listens on `5900+N`.
const VNC_DISPLAY_BASE: u16 = 5900;

/// Ports named by an emulator's arguments (program name excluded).
///
/// Every standalone number counts, so `hostfwd=tcp::2222-:22` claims 2222
/// and 22 while `22220` claims neither 2222 nor 22. The value following
/// `-vnc` is also read as a display: `-vnc :1` and `-vnc 0.0.0.0:1,to=9`
/// claim 5901.
pub fn claimed_ports(args: &[String]) -> BTreeSet<u16> {
    let mut ports: BTreeSet<u16> = args.iter().flat_map(|arg| literal_ports(arg)).collect();

    for pair in args.windows(2) {
        if matches!(pair[0].as_str(), "-vnc" | "--vnc") {
            ports.extend(vnc_display_port(&pair[1]));
        }
    }
    ports
}

fn literal_ports(arg: &str) -> impl Iterator<Item = u16> + '_ {
    arg.split(|c: char| !c.is_ascii_digit())
        .filter_map(|run| run.parse::<u16>().ok())
}

/// TCP port of a `-vnc` display value (`[host]:N[,options]`).
///
/// `none` and `unix:` sockets claim nothing.
fn vnc_display_port(value: &str) -> Option<u16> {
    let display = value.split(',').next()?;
    if display.starts_with("unix:") {
        return None;
    }
    let (_, number) = display.rsplit_once(':')?;
    number
        .parse::<u16>()
        .ok()
        .and_then(|n| VNC_DISPLAY_BASE.checked_add(n))
}

/// Whether a command line belongs to an emulator matching `patterns`.
pub fn is_emulator(name: &str, cmd: &[String], patterns: &[String]) -> bool {
    patterns.iter().any(|pattern| {
        name.contains(pattern.as_str())
            || cmd
                .first()
                .is_some_and(|program| program.contains(pattern.as_str()))
    })
}

/// Ports claimed by every running emulator matching `patterns`, from one
/// read of the process table.
pub fn emulator_ports(patterns: &[String]) -> BTreeSet<u16> {
    if patterns.is_empty() {
        return BTreeSet::new();
    }

    let mut sys = System::new();
    sys.refresh_processes();

    sys.processes()
        .values()
        .filter(|process| is_emulator(process.name(), process.cmd(), patterns))
        .flat_map(|process| claimed_ports(process.cmd().get(1..).unwrap_or_default()))
        .collect()
}
