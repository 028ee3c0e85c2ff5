//! Process-control CLI for OpenSRF service hosts.
//!
//! Operates entirely against already-running processes discovered via
//! their PID files -- it does not daemonize or supervise arbitrary
//! service binaries (those are provided by applications built on this
//! crate).  What it does own: PID-file bookkeeping, signal dispatch,
//! diagnostic inspection, and triggering a running host's router
//! (de)registration via signal.

use getopts;
use nix::sys::signal::{self, Signal};
use nix::unistd::Pid;
use opensrf::conf;
use opensrf::init;
use std::fs;
use std::path::PathBuf;
use std::thread;
use std::time::Duration;

const DEFAULT_PID_DIR: &str = "/openils/var/run";

/// One hosted service as seen through its PID file.
struct ServiceProc {
    service: String,
    pid_file: PathBuf,
}

impl ServiceProc {
    fn new(pid_dir: &str, service: &str) -> Self {
        ServiceProc {
            service: service.to_string(),
            pid_file: PathBuf::from(pid_dir).join(format!("{service}.pid")),
        }
    }

    fn read_pid(&self) -> Option<i32> {
        fs::read_to_string(&self.pid_file)
            .ok()
            .and_then(|s| s.trim().parse::<i32>().ok())
    }

    fn is_running(pid: i32) -> bool {
        // Signal 0 performs no signal delivery, only the existence and
        // permission checks -- the standard liveness probe.
        signal::kill(Pid::from_raw(pid), None).is_ok()
    }

    /// Remove a PID file that names a process no longer running.
    fn clear_orphan(&self) {
        log::warn!(
            "{}: removing orphan PID file {}",
            self.service,
            self.pid_file.display()
        );
        let _ = fs::remove_file(&self.pid_file);
    }

    fn send_signal(&self, sig: Signal) -> Result<(), String> {
        let pid = self
            .read_pid()
            .ok_or_else(|| format!("{}: no PID file at {}", self.service, self.pid_file.display()))?;

        if !ServiceProc::is_running(pid) {
            self.clear_orphan();
            return Err(format!(
                "{}: PID {pid} recorded but not running",
                self.service
            ));
        }

        signal::kill(Pid::from_raw(pid), Some(sig))
            .map_err(|e| format!("{}: failed to signal PID {pid}: {e}", self.service))
    }

    /// Ticks-since-boot of this process's start, and its accumulated
    /// CPU time in ticks, read from /proc.  Best-effort: anomalies
    /// short-circuit to None rather than panicking.
    fn proc_times(pid: i32) -> Option<(u64, u64, u64)> {
        let stat = fs::read_to_string(format!("/proc/{pid}/stat")).ok()?;

        // The second field is "(comm)" and may itself contain spaces or
        // parens, so split on the closing paren rather than whitespace.
        let after_comm = stat.rsplit_once(')')?.1;
        let fields: Vec<&str> = after_comm.split_whitespace().collect();

        // Fields are 1-indexed in proc(5); field 1 and 2 are pid/comm,
        // already consumed above, so index 0 here is field 3 (state).
        let utime: u64 = fields.get(11)?.parse().ok()?; // field 14
        let stime: u64 = fields.get(12)?.parse().ok()?; // field 15
        let starttime: u64 = fields.get(19)?.parse().ok()?; // field 22

        Some((utime, stime, starttime))
    }

    fn clk_tck() -> f64 {
        nix::unistd::sysconf(nix::unistd::SysconfVar::CLK_TCK)
            .ok()
            .flatten()
            .unwrap_or(100) as f64
    }

    fn system_uptime_secs() -> Option<f64> {
        let raw = fs::read_to_string("/proc/uptime").ok()?;
        raw.split_whitespace().next()?.parse().ok()
    }

    fn diagnose(&self) -> String {
        let pid = match self.read_pid() {
            Some(p) => p,
            None => return format!("{}: not running (no PID file)", self.service),
        };

        if !ServiceProc::is_running(pid) {
            return format!(
                "{}: ANOMALY -- PID file names {pid} but no process is running",
                self.service
            );
        }

        let tck = ServiceProc::clk_tck();

        let (cpu, uptime) = match (ServiceProc::proc_times(pid), ServiceProc::system_uptime_secs()) {
            (Some((utime, stime, starttime)), Some(sys_uptime)) => {
                let cpu_secs = (utime + stime) as f64 / tck;
                let started_secs_ago = sys_uptime - (starttime as f64 / tck);
                (Some(cpu_secs), Some(started_secs_ago))
            }
            _ => (None, None),
        };

        format!(
            "{}: running (pid {pid}) uptime={} cpu={}",
            self.service,
            uptime.map(|u| format!("{u:.0}s")).unwrap_or("unknown".to_string()),
            cpu.map(|c| format!("{c:.2}s")).unwrap_or("unknown".to_string()),
        )
    }
}

/// Every service named under any configured router's <services> list,
/// deduplicated.  Used to expand the "-all" family of flags when the
/// caller has not named specific services with --service.
fn all_known_services(config: &conf::Config) -> Vec<String> {
    let mut services: Vec<String> = Vec::new();

    for router in config.client().routers() {
        if let Some(list) = router.services() {
            for s in list {
                if !services.contains(s) {
                    services.push(s.clone());
                }
            }
        }
    }

    services
}

fn print_usage(opts: &getopts::Options) {
    print!(
        "{}",
        opts.usage("Usage: osrfctl [OPTIONS] --service <name> [--service <name> ...]")
    );
}

fn main() {
    let mut opts = getopts::Options::new();

    opts.optflag("", "start", "Start a service (unsupported by this tool)");
    opts.optflag("", "start-all", "Start all services (unsupported by this tool)");
    opts.optflag("", "stop", "Alias for --graceful-shutdown");
    opts.optflag("", "stop-all", "Alias for --graceful-shutdown-all");
    opts.optflag("", "restart", "Gracefully stop named service(s); does not restart them");
    opts.optflag("", "restart-all", "Gracefully stop all service(s); does not restart them");
    opts.optflag("", "graceful-shutdown", "SIGTERM named service(s)");
    opts.optflag("", "graceful-shutdown-all", "SIGTERM all known service(s)");
    opts.optflag("", "fast-shutdown", "SIGINT named service(s)");
    opts.optflag("", "fast-shutdown-all", "SIGINT all known service(s)");
    opts.optflag("", "immediate-shutdown", "SIGKILL named service(s)");
    opts.optflag("", "immediate-shutdown-all", "SIGKILL all known service(s)");
    opts.optflag("", "kill-with-fire", "Alias for --immediate-shutdown");
    opts.optopt("", "signal", "Send an arbitrary signal by name (e.g. USR1)", "NAME");
    opts.optflag("", "signal-all", "Apply --signal to all known service(s)");
    opts.optflag("", "router-de-register", "SIGUSR1 named service(s)");
    opts.optflag("", "router-de-register-all", "SIGUSR1 all known service(s)");
    opts.optflag("", "router-re-register", "SIGUSR2 named service(s)");
    opts.optflag("", "router-re-register-all", "SIGUSR2 all known service(s)");
    opts.optflag("", "reload", "SIGHUP named service(s)");
    opts.optflag("", "reload-all", "SIGHUP all known service(s)");
    opts.optflag("", "diagnostic", "Report status of named (or all known) service(s)");
    opts.optmulti("", "service", "Service name; may be repeated", "SERVICE");
    opts.optopt("", "pid-dir", "Directory holding <service>.pid files", "DIR");
    opts.optopt(
        "",
        "settings-startup-pause",
        "Seconds to pause before acting, to let opensrf.settings settle",
        "N",
    );
    opts.optflag("h", "help", "Print this help");

    let mut init_opts = init::InitOptions::new();
    init_opts.appname = Some("osrfctl".to_string());

    let (config, params) = match init::init_with_more_options(&mut opts, &init_opts) {
        Ok(r) => r,
        Err(e) => {
            eprintln!("osrfctl: {e}");
            std::process::exit(2);
        }
    };

    if params.opt_present("help") {
        print_usage(&opts);
        return;
    }

    if let Some(pause) = params.opt_str("settings-startup-pause") {
        if let Ok(secs) = pause.parse::<u64>() {
            thread::sleep(Duration::from_secs(secs));
        }
    }

    let pid_dir = params
        .opt_str("pid-dir")
        .unwrap_or_else(|| DEFAULT_PID_DIR.to_string());

    let mut services = params.opt_strs("service");

    let wants_all = [
        "graceful-shutdown-all",
        "fast-shutdown-all",
        "immediate-shutdown-all",
        "signal-all",
        "router-de-register-all",
        "router-re-register-all",
        "reload-all",
        "stop-all",
        "restart-all",
        "start-all",
    ]
    .iter()
    .any(|f| params.opt_present(f));

    if services.is_empty() && (wants_all || params.opt_present("diagnostic")) {
        services = all_known_services(&config);
    }

    if services.is_empty() {
        eprintln!("osrfctl: no services named; use --service or an -all flag");
        print_usage(&opts);
        std::process::exit(2);
    }

    if params.opt_present("start") || params.opt_present("start-all") {
        eprintln!(
            "osrfctl: --start/--start-all are not implemented -- this tool only \
             controls processes that are already running; the application \
             supplies its own daemonization"
        );
        std::process::exit(1);
    }

    let mut failures: Vec<String> = Vec::new();

    if params.opt_present("diagnostic") {
        for service in &services {
            let proc = ServiceProc::new(&pid_dir, service);
            println!("{}", proc.diagnose());
        }
        return;
    }

    // Map each requested action to the signal it sends, in priority
    // order -- the first matching flag wins, matching getopts' usual
    // last-flag-present semantics would be more surprising here.
    let action: Option<(&str, Signal)> = if params.opt_present("kill-with-fire")
        || params.opt_present("immediate-shutdown")
        || params.opt_present("immediate-shutdown-all")
    {
        Some(("immediate shutdown", Signal::SIGKILL))
    } else if params.opt_present("fast-shutdown") || params.opt_present("fast-shutdown-all") {
        Some(("fast shutdown", Signal::SIGINT))
    } else if params.opt_present("graceful-shutdown")
        || params.opt_present("graceful-shutdown-all")
        || params.opt_present("stop")
        || params.opt_present("stop-all")
        || params.opt_present("restart")
        || params.opt_present("restart-all")
    {
        Some(("graceful shutdown", Signal::SIGTERM))
    } else if params.opt_present("router-de-register") || params.opt_present("router-de-register-all")
    {
        Some(("router de-registration", Signal::SIGUSR1))
    } else if params.opt_present("router-re-register") || params.opt_present("router-re-register-all")
    {
        Some(("router re-registration", Signal::SIGUSR2))
    } else if params.opt_present("reload") || params.opt_present("reload-all") {
        Some(("reload", Signal::SIGHUP))
    } else if let Some(name) = params.opt_str("signal") {
        let canonical = name.trim_start_matches("SIG").to_uppercase();
        match format!("SIG{canonical}").parse::<Signal>() {
            Ok(sig) => Some(("signal", sig)),
            Err(_) => {
                eprintln!("osrfctl: unrecognized --signal value {name}");
                std::process::exit(2);
            }
        }
    } else {
        None
    };

    let (label, sig) = match action {
        Some(a) => a,
        None => {
            print_usage(&opts);
            std::process::exit(2);
        }
    };

    for service in &services {
        let proc = ServiceProc::new(&pid_dir, service);
        match proc.send_signal(sig) {
            Ok(()) => log::info!("{service}: {label} sent"),
            Err(e) => {
                log::error!("{e}");
                failures.push(e);
            }
        }
    }

    if params.opt_present("restart") || params.opt_present("restart-all") {
        eprintln!(
            "osrfctl: graceful shutdown requested; bringing services back up \
             is the job of this host's own supervisor, not osrfctl"
        );
    }

    if !failures.is_empty() {
        for f in &failures {
            eprintln!("osrfctl: {f}");
        }
        std::process::exit(1);
    }
}
