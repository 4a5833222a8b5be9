//! Posted-timestamp clock, seeded over SNTP at startup.

use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};
use tokio::net::UdpSocket;
use tracing::warn;

use crate::config::NtpConfig;
use crate::error::{ServerError, ServerResult};

/// Format for `posted` fields: RFC3339, millisecond precision, UTC.
const POSTED_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.3fZ";

/// Seconds between the NTP epoch (1900) and the UNIX epoch (1970).
const NTP_UNIX_OFFSET: u64 = 2_208_988_800;

const SNTP_TIMEOUT: Duration = Duration::from_secs(5);
const RETRY_PAUSE: Duration = Duration::from_millis(500);

/// A wall clock with a fixed offset from the system clock, derived from
/// a reference time acquired at startup.
#[derive(Debug, Clone, Copy)]
pub struct Clock {
    offset: chrono::Duration,
}

impl Clock {
    /// A clock with no correction; used by tests.
    pub fn system() -> Clock {
        Clock {
            offset: chrono::Duration::zero(),
        }
    }

    /// A clock correcting the system clock toward `reference`, sampled
    /// now.
    pub fn with_reference(reference: DateTime<Utc>) -> Clock {
        Clock {
            offset: reference - Utc::now(),
        }
    }

    /// The corrected current time.
    pub fn now(&self) -> DateTime<Utc> {
        Utc::now() + self.offset
    }

    /// The corrected current time in `posted` wire format.
    pub fn posted(&self) -> String {
        self.now().format(POSTED_FORMAT).to_string()
    }
}

/// Queries the configured hosts until one answers, returning a clock
/// anchored to that answer.
pub async fn acquire(config: &NtpConfig) -> ServerResult<Clock> {
    for host in &config.hosts {
        for _ in 0..config.retries {
            match sntp_time(host).await {
                Ok(reference) => return Ok(Clock::with_reference(reference)),
                Err(err) => {
                    warn!(host = %host, error = %err, "ntp query failed");
                    tokio::time::sleep(RETRY_PAUSE).await;
                }
            }
        }
    }
    Err(ServerError::NtpUnavailable)
}

/// One SNTP (RFC 4330) request: a 48-byte client packet; the reply's
/// transmit timestamp is the server's notion of now.
pub async fn sntp_time(host: &str) -> std::io::Result<DateTime<Utc>> {
    let addr = if host.contains(':') {
        host.to_string()
    } else {
        format!("{host}:123")
    };

    let socket = UdpSocket::bind("0.0.0.0:0").await?;
    socket.connect(&addr).await?;

    let mut packet = [0u8; 48];
    packet[0] = 0x23; // LI=0, VN=4, Mode=3 (client)
    socket.send(&packet).await?;

    let mut reply = [0u8; 48];
    let len = tokio::time::timeout(SNTP_TIMEOUT, socket.recv(&mut reply))
        .await
        .map_err(|_| std::io::Error::new(std::io::ErrorKind::TimedOut, "sntp timeout"))??;
    if len < 48 {
        return Err(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            "short sntp reply",
        ));
    }

    let secs = u32::from_be_bytes([reply[40], reply[41], reply[42], reply[43]]) as u64;
    let frac = u32::from_be_bytes([reply[44], reply[45], reply[46], reply[47]]) as u64;
    if secs < NTP_UNIX_OFFSET {
        return Err(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            "sntp reply predates unix epoch",
        ));
    }
    let unix_secs = (secs - NTP_UNIX_OFFSET) as i64;
    let nanos = ((frac * 1_000_000_000) >> 32) as u32;
    Utc.timestamp_opt(unix_secs, nanos).single().ok_or_else(|| {
        std::io::Error::new(std::io::ErrorKind::InvalidData, "sntp timestamp out of range")
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn posted_format_shape() {
        let posted = Clock::system().posted();
        // 2024-01-02T03:04:05.678Z
        assert_eq!(posted.len(), 24);
        assert!(posted.ends_with('Z'));
        assert_eq!(&posted[4..5], "-");
        assert_eq!(&posted[10..11], "T");
        assert_eq!(&posted[19..20], ".");
    }

    #[test]
    fn reference_offset_is_applied() {
        let future = Utc::now() + chrono::Duration::seconds(3600);
        let clock = Clock::with_reference(future);
        let skew = clock.now() - Utc::now();
        assert!(skew > chrono::Duration::seconds(3590));
        assert!(skew < chrono::Duration::seconds(3610));
    }

    #[tokio::test]
    async fn sntp_round_trip_against_local_responder() {
        let server = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let addr = server.local_addr().unwrap();
        tokio::spawn(async move {
            let mut buf = [0u8; 48];
            let (_, peer) = server.recv_from(&mut buf).await.unwrap();
            let mut reply = [0u8; 48];
            reply[0] = 0x24; // LI=0, VN=4, Mode=4 (server)
            // Transmit timestamp: 2020-01-01T00:00:00Z.
            let secs = (NTP_UNIX_OFFSET + 1_577_836_800) as u32;
            reply[40..44].copy_from_slice(&secs.to_be_bytes());
            server.send_to(&reply, peer).await.unwrap();
        });

        let time = sntp_time(&addr.to_string()).await.unwrap();
        assert_eq!(time.timestamp(), 1_577_836_800);
    }
}
