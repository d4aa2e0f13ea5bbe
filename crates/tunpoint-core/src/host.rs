//! Host callback capability set
//!
//! Implemented by the platform VPN service and called by the control plane.
//! Every method returns the host's status code; `0` means success.

/// Status code the host receives with "Running" and "Closed"
pub const STATUS_OK: i32 = 0;

#[cfg_attr(test, mockall::automock)]
pub trait HostCallbacks: Send + Sync {
    /// Configure the tunnel interface from a VPN setup argument string
    fn setup(&self, vpn_args: &str) -> i32;

    /// Prepare the tunnel interface
    fn prepare(&self) -> i32;

    /// The control plane stopped on its own; tear down the VPN service
    fn shutdown(&self) -> i32;

    /// Exempt a socket from the VPN's own routing
    fn protect(&self, fd: i32) -> i32;

    fn on_emit_status(&self, code: i32, message: &str) -> i32;

    /// Hand the tunnel file descriptor to the packet-capture helper
    fn send_fd(&self) -> i32;
}
