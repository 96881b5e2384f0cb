//! Mail protocol plumbing: a TLS dialer shared by the minimal IMAP and SMTP
//! clients the email trigger and email node run on.

pub mod imap;
pub mod smtp;
pub mod tls;
