use crate::AppEvent;
use crate::error::{Result, TransferError};
use std::future::Future;
use std::path::Path;
use std::time::{Duration, Instant};
use tokio::fs::{File, OpenOptions};
use tokio::sync::mpsc;

const FALLBACK_NAME: &str = "unknown_file";
/// Longest file name most filesystems accept, in bytes
const MAX_NAME_BYTES: usize = 255;

const RESERVED_NAMES: [&str; 22] = [
    "CON", "PRN", "AUX", "NUL", "COM1", "COM2", "COM3", "COM4", "COM5", "COM6", "COM7", "COM8",
    "COM9", "LPT1", "LPT2", "LPT3", "LPT4", "LPT5", "LPT6", "LPT7", "LPT8", "LPT9",
];

/// Reduce a peer-supplied name to a bare, safe file name inside the received directory
pub fn sanitize_file_name(file_name: &str) -> String {
    // Last component only, for either separator style
    let base = file_name.rsplit(['/', '\\']).next().unwrap_or("");

    let mut clean: String = base.chars().filter(|c| !c.is_control()).collect();

    if clean.trim().is_empty()
        || clean == "."
        || clean == ".."
        || RESERVED_NAMES.iter().any(|r| clean.eq_ignore_ascii_case(r))
    {
        return FALLBACK_NAME.to_string();
    }

    if clean.len() > MAX_NAME_BYTES {
        let mut cutoff = MAX_NAME_BYTES;
        while !clean.is_char_boundary(cutoff) {
            cutoff -= 1;
        }
        clean.truncate(cutoff);
    }

    clean
}

/// Create (or truncate) a file readable only by its owner on Unix
pub async fn open_secure_file(path: &Path) -> std::io::Result<File> {
    let mut options = OpenOptions::new();
    options.write(true).create(true).truncate(true);
    #[cfg(unix)]
    options.mode(0o600);

    options.open(path).await
}

/// Bound a protocol step in time; `what` names the step in the resulting error
pub async fn with_timeout<T>(
    limit: Duration,
    what: &'static str,
    fut: impl Future<Output = Result<T>>,
) -> Result<T> {
    tokio::time::timeout(limit, fut)
        .await
        .map_err(|_| TransferError::Timeout(what))?
}

/// Format transfer speed from bytes and elapsed time
pub fn format_transfer_speed(bytes_transferred: u64, elapsed_secs: f64) -> String {
    if elapsed_secs <= 0.0 {
        return "Starting...".to_string();
    }

    let speed_bps = bytes_transferred as f64 / elapsed_secs;
    if speed_bps > 1_000_000.0 {
        format!("{:.2} MB/s", speed_bps / 1_000_000.0)
    } else if speed_bps > 1_000.0 {
        format!("{:.1} KB/s", speed_bps / 1_000.0)
    } else {
        format!("{:.0} B/s", speed_bps)
    }
}

/// Report transfer progress to the event channel
pub async fn report_progress(
    event_tx: &mpsc::Sender<AppEvent>,
    file_name: &str,
    bytes_done: u64,
    total_bytes: u64,
    start_time: Instant,
    is_sending: bool,
) {
    let progress = if total_bytes == 0 {
        100.0
    } else {
        (bytes_done as f32 / total_bytes as f32) * 100.0
    };
    let elapsed = start_time.elapsed().as_secs_f64();

    let _ = event_tx
        .send(AppEvent::TransferProgress {
            file_name: file_name.to_string(),
            progress,
            speed: format_transfer_speed(bytes_done, elapsed),
            is_sending,
        })
        .await;
}

/// Best LAN IPv4 address to show to the person on the other machine.
/// Prefers 192.168.x.x, then 10.x.x.x, then 172.x.x.x, then anything non-loopback.
pub fn local_lan_ip() -> String {
    local_ip_address::list_afinet_netifas()
        .ok()
        .and_then(|ips| {
            let mut best: Option<(u8, String)> = None;
            for (_name, ip) in ips {
                if ip.is_loopback() || !ip.is_ipv4() {
                    continue;
                }
                let ip_str = ip.to_string();
                let rank = if ip_str.starts_with("192.168.") {
                    0
                } else if ip_str.starts_with("10.") {
                    1
                } else if ip_str.starts_with("172.") {
                    2
                } else {
                    3
                };
                if best.as_ref().is_none_or(|(r, _)| rank < *r) {
                    best = Some((rank, ip_str));
                }
            }
            best.map(|(_, ip)| ip)
        })
        .unwrap_or_else(|| "127.0.0.1".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sanitize_file_name_basic() {
        assert_eq!(sanitize_file_name("report.pdf"), "report.pdf");
        assert_eq!(sanitize_file_name("path/to/file.txt"), "file.txt");
        assert_eq!(sanitize_file_name("C:\\Users\\me\\calc.exe"), "calc.exe");
    }

    #[test]
    fn test_sanitize_file_name_traversal() {
        assert_eq!(sanitize_file_name("../../etc/passwd"), "passwd");
        assert_eq!(sanitize_file_name("folder\\../file.txt"), "file.txt");
        assert_eq!(sanitize_file_name(".."), "unknown_file");
        assert_eq!(sanitize_file_name("."), "unknown_file");
        assert_eq!(sanitize_file_name(""), "unknown_file");
        assert_eq!(sanitize_file_name("dir/"), "unknown_file");
    }

    #[test]
    fn test_sanitize_file_name_reserved_and_control() {
        assert_eq!(sanitize_file_name("con"), "unknown_file");
        assert_eq!(sanitize_file_name("LPT1"), "unknown_file");
        assert_eq!(sanitize_file_name("concert.txt"), "concert.txt");
        assert_eq!(sanitize_file_name("a\u{0}b\nc.txt"), "abc.txt");
    }

    #[test]
    fn test_sanitize_file_name_length_limit() {
        assert_eq!(sanitize_file_name(&"a".repeat(256)), "a".repeat(255));
        // 2-byte characters: 128 * 2 = 256 bytes, cut back to 127 characters
        assert_eq!(sanitize_file_name(&"é".repeat(128)), "é".repeat(127));
    }

    #[test]
    fn test_format_transfer_speed() {
        assert_eq!(format_transfer_speed(100, 0.0), "Starting...");
        assert_eq!(format_transfer_speed(500, 1.0), "500 B/s");
        assert_eq!(format_transfer_speed(2_500, 1.0), "2.5 KB/s");
        assert_eq!(format_transfer_speed(3_000_000, 1.0), "3.00 MB/s");
    }

    #[test]
    fn test_local_lan_ip_is_ipv4() {
        let ip = local_lan_ip();
        assert!(ip.parse::<std::net::Ipv4Addr>().is_ok(), "{}", ip);
    }

    #[tokio::test]
    async fn test_with_timeout_names_the_step() {
        let slow = async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(())
        };
        let err = with_timeout(Duration::from_millis(10), "waiting", slow)
            .await
            .unwrap_err();
        assert!(matches!(err, TransferError::Timeout("waiting")));
    }

    #[tokio::test]
    async fn test_report_progress_zero_total() {
        let (tx, mut rx) = mpsc::channel(1);
        report_progress(&tx, "empty.bin", 0, 0, Instant::now(), false).await;
        match rx.recv().await.unwrap() {
            AppEvent::TransferProgress { progress, .. } => assert_eq!(progress, 100.0),
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_open_secure_file_permissions() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("secret.bin");
        let _file = open_secure_file(&path).await.unwrap();

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = std::fs::metadata(&path).unwrap().permissions().mode();
            assert_eq!(mode & 0o777, 0o600);
        }
    }
}
