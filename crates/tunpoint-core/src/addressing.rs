//! Tunnel interface addressing
//!
//! The host's tunnel interface and the packet-capture helper sit on a private
//! /30 (and a /126 for IPv6). The host side is the gateway, the helper side
//! the `.2` address.

use std::path::{Path, PathBuf};

use crate::config::ControllerConfig;

pub const TUN_GATEWAY_V4: &str = "26.26.26.1";
pub const TUN_HELPER_V4: &str = "26.26.26.2";
pub const TUN_NETMASK_V4: &str = "255.255.255.252";
pub const TUN_PREFIX_V4: u8 = 30;
pub const TUN_GATEWAY_V6: &str = "da26:2626::1";
pub const TUN_HELPER_V6: &str = "da26:2626::2";
pub const TUN_PREFIX_V6: u8 = 126;

/// Name of the unix socket the helper receives the tunnel fd on
pub const FD_SOCKET_NAME: &str = "sock_path";

/// VPN setup string for [`HostCallbacks::setup`](crate::HostCallbacks::setup).
///
/// Space-separated entries: `m,<mtu>`, `a,<addr>,<prefix>`, `r,<route>,<prefix>`
/// and `d,<dns server>`.
pub fn vpn_setup_arg(mtu: u16, enable_local_dns: bool, forward_ipv6: bool) -> String {
    let mut arg = format!(
        "m,{} a,{},{} r,0.0.0.0,0",
        mtu, TUN_GATEWAY_V4, TUN_PREFIX_V4
    );
    if forward_ipv6 {
        arg.push_str(&format!(" a,{},{} r,::,0", TUN_GATEWAY_V6, TUN_PREFIX_V6));
    }
    if enable_local_dns {
        arg.push_str(&format!(" d,{}", TUN_HELPER_V4));
    }
    arg
}

/// Full path of the helper binary
pub fn helper_path(config: &ControllerConfig, data_dir: &Path) -> PathBuf {
    data_dir.join(&config.helper_binary)
}

/// Command line for the packet-capture helper
pub fn helper_args(
    config: &ControllerConfig,
    data_dir: &Path,
    enable_local_dns: bool,
    forward_ipv6: bool,
) -> Vec<String> {
    let mut args: Vec<String> = vec![
        "--netif-ipaddr".into(),
        TUN_HELPER_V4.into(),
        "--netif-netmask".into(),
        TUN_NETMASK_V4.into(),
        "--socks-server-addr".into(),
        format!("127.0.0.1:{}", config.socks_port),
        "--tunmtu".into(),
        config.mtu.to_string(),
        "--loglevel".into(),
        "notice".into(),
        "--enable-udprelay".into(),
        "--sock-path".into(),
        data_dir.join(FD_SOCKET_NAME).display().to_string(),
    ];

    if forward_ipv6 {
        args.push("--netif-ip6addr".into());
        args.push(TUN_HELPER_V6.into());
    }

    if enable_local_dns {
        args.push("--dnsgw".into());
        args.push(format!("{}:{}", TUN_GATEWAY_V4, config.local_dns_port));
    }

    args
}
