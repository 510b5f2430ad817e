//! Network subsystem: UDP transport and the RTP pipelines

pub mod receiver;
pub mod sender;
pub mod udp;

pub use receiver::RtpReceiver;
pub use sender::RtpSender;
pub use udp::{create_socket, PacketContainer, Transport, UdpTransport};
