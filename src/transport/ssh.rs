//! Shell channel: SSH command execution with an SFTP sub-channel for file
//! transfer. libssh2 is blocking, so every operation runs on the blocking
//! thread pool.

use std::io::{Read, Write};
use std::net::ToSocketAddrs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tracing::debug;

use crate::transport::{ChannelError, ShellChannel};

struct Inner {
    session: ssh2::Session,
    sftp: ssh2::Sftp,
}

pub struct SshShellChannel {
    inner: Arc<Mutex<Inner>>,
}

impl SshShellChannel {
    /// Connects, authenticates and opens the SFTP sub-channel. `timeout`
    /// bounds the TCP connect and every subsequent blocking libssh2 call.
    pub async fn connect(
        host: &str,
        port: u16,
        username: &str,
        password: &str,
        timeout: Duration,
    ) -> Result<Self, ChannelError> {
        let host = host.to_string();
        let username = username.to_string();
        let password = password.to_string();
        let inner = tokio::task::spawn_blocking(move || -> Result<Inner, ChannelError> {
            let addr = (host.as_str(), port)
                .to_socket_addrs()?
                .next()
                .ok_or_else(|| ChannelError::Protocol(format!("could not resolve {host}")))?;
            let tcp = std::net::TcpStream::connect_timeout(&addr, timeout)?;
            let mut session = ssh2::Session::new()?;
            session.set_tcp_stream(tcp);
            session.set_timeout(timeout.as_millis() as u32);
            session.handshake()?;
            session.userauth_password(&username, &password)?;
            let sftp = session.sftp()?;
            debug!(host = %host, "SSH session established.");
            Ok(Inner { session, sftp })
        })
        .await
        .map_err(join_error)??;

        Ok(Self {
            inner: Arc::new(Mutex::new(inner)),
        })
    }
}

fn join_error(e: tokio::task::JoinError) -> ChannelError {
    ChannelError::Protocol(format!("blocking ssh task failed: {e}"))
}

fn lock_error() -> ChannelError {
    ChannelError::Protocol("ssh session lock poisoned".to_string())
}

#[async_trait::async_trait]
impl ShellChannel for SshShellChannel {
    async fn run_command(&mut self, command: &str) -> Result<String, ChannelError> {
        let inner = self.inner.clone();
        let command = command.to_string();
        tokio::task::spawn_blocking(move || -> Result<String, ChannelError> {
            let guard = inner.lock().map_err(|_| lock_error())?;
            let mut channel = guard.session.channel_session()?;
            channel.exec(&command)?;
            let mut stdout = String::new();
            channel.read_to_string(&mut stdout)?;
            let mut stderr = String::new();
            channel.stderr().read_to_string(&mut stderr)?;
            channel.wait_close()?;
            if !stderr.trim().is_empty() {
                return Err(ChannelError::CommandFailed(stderr.trim().to_string()));
            }
            Ok(stdout)
        })
        .await
        .map_err(join_error)?
    }

    async fn upload(&mut self, local: &Path, remote: &str) -> Result<(), ChannelError> {
        let inner = self.inner.clone();
        let local: PathBuf = local.to_path_buf();
        let remote = remote.to_string();
        tokio::task::spawn_blocking(move || -> Result<(), ChannelError> {
            let bytes = std::fs::read(&local)?;
            let guard = inner.lock().map_err(|_| lock_error())?;
            let mut file = guard.sftp.create(Path::new(&remote))?;
            file.write_all(&bytes)?;
            Ok(())
        })
        .await
        .map_err(join_error)?
    }

    async fn download(&mut self, remote: &str, local: &Path) -> Result<(), ChannelError> {
        let inner = self.inner.clone();
        let local: PathBuf = local.to_path_buf();
        let remote = remote.to_string();
        tokio::task::spawn_blocking(move || -> Result<(), ChannelError> {
            let bytes = {
                let guard = inner.lock().map_err(|_| lock_error())?;
                let mut file = guard.sftp.open(Path::new(&remote))?;
                let mut bytes = Vec::new();
                file.read_to_end(&mut bytes)?;
                bytes
            };
            std::fs::write(&local, bytes)?;
            Ok(())
        })
        .await
        .map_err(join_error)?
    }

    async fn close(&mut self) {
        let inner = self.inner.clone();
        let _ = tokio::task::spawn_blocking(move || {
            if let Ok(guard) = inner.lock() {
                let _ = guard
                    .session
                    .disconnect(None, "closing shell channel", None);
            }
        })
        .await;
    }
}
