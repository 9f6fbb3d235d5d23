//! Bridge/TAP/NAT lifecycle for a single lab, driven entirely by discrete
//! `Command` invocations (never a shell) — `lab_id` is attacker-reachable
//! input by the time it gets here, so no string built from it may ever be
//! interpreted by `/bin/sh`.

use std::net::Ipv4Addr;
use std::process::{Command, Output};

use anyhow::{Context, Result, bail};
use octolab_core::naming;
use uuid::Uuid;

/// The bridge always gets this address; TAP traffic for the lab's guest
/// lives behind it. Every lab gets its own /30-ish private range derived
/// from the bridge name so bridges never collide on address space even
/// though they're all privately routed.
fn gateway_ip(lab_id: Uuid) -> Ipv4Addr {
    let bytes = lab_id.as_bytes();
    Ipv4Addr::new(10, 200, bytes[0], 1)
}

fn guest_ip(lab_id: Uuid) -> Ipv4Addr {
    let bytes = lab_id.as_bytes();
    Ipv4Addr::new(10, 200, bytes[0], 2)
}

fn subnet_cidr(lab_id: Uuid) -> String {
    let bytes = lab_id.as_bytes();
    format!("10.200.{}.0/30", bytes[0])
}

fn nat_comment(lab_id: Uuid) -> String {
    format!("octolab-lab-{lab_id}")
}

fn run(cmd: &str, args: &[&str]) -> Result<Output> {
    Command::new(cmd)
        .args(args)
        .output()
        .with_context(|| format!("failed to spawn: {cmd} {}", args.join(" ")))
}

fn run_ok(cmd: &str, args: &[&str]) -> Result<()> {
    let out = run(cmd, args)?;
    if !out.status.success() {
        bail!(
            "{cmd} {} failed (exit {:?}): {}",
            args.join(" "),
            out.status.code(),
            String::from_utf8_lossy(&out.stderr).trim()
        );
    }
    Ok(())
}

fn link_exists(name: &str) -> Result<bool> {
    let out = run("ip", &["link", "show", name])?;
    Ok(out.status.success())
}

/// iptables rule check (`-C`) before add (`-A`) — the idempotent pattern
/// for any rule that doesn't already have a dedicated existence check.
fn iptables_add_if_missing(table_args: &[&str]) -> Result<()> {
    let mut check_args = vec!["-C"];
    check_args.extend_from_slice(&table_args[1..]);
    let exists = run("iptables", &check_args)?.status.success();
    if !exists {
        let mut add_args = vec!["-A"];
        add_args.extend_from_slice(&table_args[1..]);
        run_ok("iptables", &add_args)?;
    }
    Ok(())
}

fn iptables_remove_if_present(table_args: &[&str]) -> Result<()> {
    let mut check_args = vec!["-C"];
    check_args.extend_from_slice(&table_args[1..]);
    let exists = run("iptables", &check_args)?.status.success();
    if exists {
        let mut del_args = vec!["-D"];
        del_args.extend_from_slice(&table_args[1..]);
        run_ok("iptables", &del_args)?;
    }
    Ok(())
}

pub struct CreatedResources {
    pub bridge: String,
    pub tap: String,
}

/// Idempotent: re-creating an existing bridge/TAP for the same `lab_id`
/// returns success with the same names. Any failure partway through is
/// rolled back before returning.
pub fn create(lab_id: Uuid) -> Result<CreatedResources> {
    let bridge = naming::bridge_name(lab_id);
    let tap = naming::tap_name(lab_id);
    let gw = gateway_ip(lab_id);
    let subnet = subnet_cidr(lab_id);
    let comment = nat_comment(lab_id);

    match create_inner(&bridge, &tap, gw, &subnet, &comment) {
        Ok(()) => Ok(CreatedResources { bridge, tap }),
        Err(e) => {
            // Roll back whatever got created before the failure.
            let _ = destroy_inner(&bridge, &tap, &comment);
            Err(e)
        }
    }
}

fn create_inner(
    bridge: &str,
    tap: &str,
    gw: Ipv4Addr,
    subnet: &str,
    comment: &str,
) -> Result<()> {
    if !link_exists(bridge)? {
        run_ok("ip", &["link", "add", "name", bridge, "type", "bridge"])?;
        run_ok(
            "ip",
            &["addr", "add", &format!("{gw}/30"), "dev", bridge],
        )?;
        run_ok("ip", &["link", "set", bridge, "up"])?;
    }

    if !link_exists(tap)? {
        run_ok("ip", &["tuntap", "add", "dev", tap, "mode", "tap"])?;
        run_ok("ip", &["link", "set", tap, "master", bridge])?;
        run_ok("ip", &["link", "set", tap, "up"])?;
    }

    let out_iface = default_route_iface()?;

    iptables_add_if_missing(&[
        "iptables",
        "-t",
        "nat",
        "POSTROUTING",
        "-s",
        subnet,
        "-o",
        &out_iface,
        "-m",
        "comment",
        "--comment",
        comment,
        "-j",
        "MASQUERADE",
    ])?;
    iptables_add_if_missing(&[
        "iptables",
        "FORWARD",
        "-i",
        bridge,
        "-o",
        &out_iface,
        "-m",
        "comment",
        "--comment",
        comment,
        "-j",
        "ACCEPT",
    ])?;
    iptables_add_if_missing(&[
        "iptables",
        "FORWARD",
        "-i",
        &out_iface,
        "-o",
        bridge,
        "-m",
        "state",
        "--state",
        "RELATED,ESTABLISHED",
        "-m",
        "comment",
        "--comment",
        comment,
        "-j",
        "ACCEPT",
    ])?;

    Ok(())
}

pub struct DestroyedResources {
    pub bridge_deleted: String,
    pub tap_deleted: String,
}

/// Idempotent: missing devices are not an error.
pub fn destroy(lab_id: Uuid) -> Result<DestroyedResources> {
    let bridge = naming::bridge_name(lab_id);
    let tap = naming::tap_name(lab_id);
    let comment = nat_comment(lab_id);
    destroy_inner(&bridge, &tap, &comment)?;
    Ok(DestroyedResources {
        bridge_deleted: bridge,
        tap_deleted: tap,
    })
}

fn destroy_inner(bridge: &str, tap: &str, comment: &str) -> Result<()> {
    let out_iface = default_route_iface().unwrap_or_else(|_| "eth0".to_string());

    // Remove exactly the rules tagged with this lab's comment.
    let _ = iptables_remove_if_present(&[
        "iptables",
        "-t",
        "nat",
        "POSTROUTING",
        "-s",
        "0.0.0.0/0",
        "-o",
        &out_iface,
        "-m",
        "comment",
        "--comment",
        comment,
        "-j",
        "MASQUERADE",
    ]);
    let _ = iptables_remove_if_present(&[
        "iptables",
        "FORWARD",
        "-i",
        bridge,
        "-o",
        &out_iface,
        "-m",
        "comment",
        "--comment",
        comment,
        "-j",
        "ACCEPT",
    ]);
    let _ = iptables_remove_if_present(&[
        "iptables",
        "FORWARD",
        "-i",
        &out_iface,
        "-o",
        bridge,
        "-m",
        "state",
        "--state",
        "RELATED,ESTABLISHED",
        "-m",
        "comment",
        "--comment",
        comment,
        "-j",
        "ACCEPT",
    ]);

    if link_exists(tap)? {
        run_ok("ip", &["link", "del", tap])?;
    }
    if link_exists(bridge)? {
        run_ok("ip", &["link", "del", bridge])?;
    }
    Ok(())
}

fn default_route_iface() -> Result<String> {
    let out = run("ip", &["-j", "route", "list", "default"])?;
    if !out.status.success() {
        bail!("failed to query default route");
    }
    let stdout = String::from_utf8_lossy(&out.stdout);
    let parsed: serde_json::Value =
        serde_json::from_str(&stdout).context("failed to parse `ip -j route list default`")?;
    parsed
        .as_array()
        .and_then(|routes| routes.first())
        .and_then(|r| r.get("dev"))
        .and_then(|d| d.as_str())
        .map(|s| s.to_string())
        .context("no default route found")
}

/// Used to derive the guest's address when the firecracker runtime
/// configures the VM's network interface.
pub fn guest_address(lab_id: Uuid) -> (Ipv4Addr, Ipv4Addr, u8) {
    (guest_ip(lab_id), gateway_ip(lab_id), 30)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gateway_and_guest_ip_differ() {
        let id = Uuid::new_v4();
        assert_ne!(gateway_ip(id), guest_ip(id));
    }

    #[test]
    fn test_gateway_ip_deterministic() {
        let id = Uuid::new_v4();
        assert_eq!(gateway_ip(id), gateway_ip(id));
    }

    #[test]
    fn test_nat_comment_contains_lab_id() {
        let id = Uuid::new_v4();
        assert!(nat_comment(id).contains(&id.to_string()));
    }

    #[test]
    fn test_subnet_cidr_shape() {
        let id = Uuid::new_v4();
        let subnet = subnet_cidr(id);
        assert!(subnet.starts_with("10.200."));
        assert!(subnet.ends_with("/30"));
    }
}
