use colored::Colorize;

fn prefix() -> String {
    "[octolab]".bold().cyan().to_string()
}

/// Print an informational message: [octolab] message
pub fn info(msg: &str) {
    println!("{} {}", prefix(), msg);
}

/// Print a success message: [octolab] message (in green)
pub fn success(msg: &str) {
    println!("{} {}", prefix(), msg.green());
}

/// Print an error message: [octolab] ERROR: message (in red)
pub fn error(msg: &str) {
    eprintln!("{} {}", "[octolab]".bold().red(), msg.red());
}

/// Print a warning message: [octolab] message (in yellow)
pub fn warn(msg: &str) {
    println!("{} {}", prefix(), msg.yellow());
}

/// Print a doctor/smoke check line with a colored pass/fail marker.
pub fn check_line(name: &str, ok: bool, severity: &str, details: &str) {
    let marker = if ok { "ok".green() } else { "FAIL".red().bold() };
    println!("  [{}] {:<24} {:<6} {}", marker, name, severity.dimmed(), details);
}
