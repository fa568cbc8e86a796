use std::io::Read;
use std::net::{TcpStream, ToSocketAddrs};
use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use ssh2::{Session, Sftp};

use crate::auth::Credentials;
use crate::pool::SessionPool;
use crate::store::{ChunkSender, ErrorClass, RemoteEntry, RemoteError, RemoteReader, RemoteStore};

const DEFAULT_CHUNK_SIZE: usize = 256 * 1024;
const READER_BUFFER: usize = 4;

#[derive(Debug, Clone, Copy)]
pub struct SftpOptions {
    /// Number of SSH sessions opened up front.
    pub pool_size: usize,
    pub connect_timeout: Duration,
    /// Upper bound for every blocking libssh2 call once connected.
    pub io_timeout: Duration,
    /// Budget for one folder listing, counted from the moment a session is held.
    pub list_timeout: Duration,
    pub chunk_size: usize,
}

impl Default for SftpOptions {
    fn default() -> Self {
        Self {
            pool_size: 1,
            connect_timeout: Duration::from_secs(15),
            io_timeout: Duration::from_secs(30),
            list_timeout: Duration::from_secs(30),
            chunk_size: DEFAULT_CHUNK_SIZE,
        }
    }
}

struct SftpConn {
    session: Session,
    sftp: Sftp,
}

/// Bounded pool of SFTP sessions. A libssh2 session does not serve
/// interleaved requests, so every call checks one out for itself and runs
/// on the blocking thread pool. A download keeps its session until the
/// last chunk is sent.
pub struct SftpStore {
    pool: SessionPool<SftpConn>,
    chunk_size: usize,
    list_timeout: Duration,
    address: String,
}

impl SftpStore {
    pub async fn connect(
        credentials: &Credentials,
        options: SftpOptions,
    ) -> Result<Self, RemoteError> {
        let pool_size = options.pool_size.max(1);
        let mut conns = Vec::with_capacity(pool_size);
        for _ in 0..pool_size {
            let credentials = credentials.clone();
            conns.push(run_blocking(move || connect_one(&credentials, &options)).await?);
        }
        Ok(Self {
            pool: SessionPool::new(conns),
            chunk_size: options.chunk_size.max(1),
            list_timeout: options.list_timeout,
            address: credentials.address(),
        })
    }

    pub fn address(&self) -> &str {
        &self.address
    }
}

#[async_trait]
impl RemoteStore for SftpStore {
    async fn list(&self, folder: &str) -> Result<Vec<RemoteEntry>, RemoteError> {
        let folder = folder.to_string();
        self.pool
            .run(self.list_timeout, format!("listing {folder}"), move |conn| {
                let items = conn
                    .sftp
                    .readdir(Path::new(&folder))
                    .map_err(|err| path_error(err, &folder))?;
                Ok(items
                    .into_iter()
                    .filter(|(_, stat)| stat.is_file())
                    .filter_map(|(path, stat)| {
                        let name = path.file_name()?.to_str()?.to_string();
                        Some(RemoteEntry::from_unix(
                            name,
                            stat.size.unwrap_or(0),
                            stat.mtime.unwrap_or(0),
                        ))
                    })
                    .collect())
            })
            .await
    }

    async fn open(&self, path: &str) -> Result<RemoteReader, RemoteError> {
        let mut checkout = self.pool.checkout().await?;
        let path = path.to_string();
        let chunk_size = self.chunk_size;
        let (tx, reader) = RemoteReader::channel(READER_BUFFER);
        tokio::task::spawn_blocking(move || {
            if let Err(err) = pump_file(checkout.session(), &path, chunk_size, &tx) {
                let _ = tx.blocking_send(Err(err));
            }
            checkout.release();
        });
        Ok(reader)
    }

    async fn close(&self) -> Result<(), RemoteError> {
        let Some(conns) = self.pool.drain().await else {
            return Ok(());
        };
        let mut first_error = None;
        for conn in conns {
            let result = run_blocking(move || {
                conn.session
                    .disconnect(None, "sync run finished", None)
                    .map_err(RemoteError::from)
            })
            .await;
            if let Err(err) = result {
                first_error.get_or_insert(err);
            }
        }
        first_error.map_or(Ok(()), Err)
    }
}

fn pump_file(
    conn: &SftpConn,
    path: &str,
    chunk_size: usize,
    tx: &ChunkSender,
) -> Result<(), RemoteError> {
    let mut file = conn
        .sftp
        .open(Path::new(path))
        .map_err(|err| path_error(err, path))?;
    let mut buf = vec![0u8; chunk_size];
    loop {
        let read = file.read(&mut buf)?;
        if read == 0 {
            return Ok(());
        }
        if tx.blocking_send(Ok(buf[..read].to_vec())).is_err() {
            // Reader dropped: the transfer was cancelled or timed out.
            return Ok(());
        }
    }
}

fn connect_one(credentials: &Credentials, options: &SftpOptions) -> Result<SftpConn, RemoteError> {
    let address = credentials.address();
    let socket = address
        .to_socket_addrs()
        .map_err(|err| RemoteError::Connection(format!("cannot resolve {address}: {err}")))?
        .next()
        .ok_or_else(|| RemoteError::Connection(format!("no address found for {address}")))?;
    let tcp = TcpStream::connect_timeout(&socket, options.connect_timeout)
        .map_err(|err| RemoteError::Connection(format!("tcp connect to {address} failed: {err}")))?;

    let mut session = Session::new()?;
    session.set_timeout(millis(options.connect_timeout));
    session.set_tcp_stream(tcp);
    session.handshake().map_err(|err| {
        RemoteError::Connection(format!("ssh handshake with {address} failed: {err}"))
    })?;
    authenticate(&session, credentials)?;
    session.set_timeout(millis(options.io_timeout));
    let sftp = session.sftp()?;
    Ok(SftpConn { session, sftp })
}

fn authenticate(session: &Session, credentials: &Credentials) -> Result<(), RemoteError> {
    let mut reasons = Vec::new();
    if let Some(key) = &credentials.private_key_path
        && let Err(err) = session.userauth_pubkey_file(
            &credentials.username,
            None,
            key,
            credentials.private_key_passphrase.as_deref(),
        )
    {
        reasons.push(format!("key {}: {err}", key.display()));
    }
    if !session.authenticated()
        && let Some(password) = credentials.password.as_deref().filter(|p| !p.is_empty())
        && let Err(err) = session.userauth_password(&credentials.username, password)
    {
        reasons.push(format!("password: {err}"));
    }
    if session.authenticated() {
        return Ok(());
    }
    Err(RemoteError::Auth {
        user: credentials.username.clone(),
        reason: if reasons.is_empty() {
            "no authentication method configured".to_string()
        } else {
            reasons.join("; ")
        },
    })
}

fn path_error(err: ssh2::Error, path: &str) -> RemoteError {
    let err = RemoteError::Ssh(err);
    if err.classification() == ErrorClass::NotFound {
        RemoteError::NotFound(path.to_string())
    } else {
        err
    }
}

async fn run_blocking<T, F>(f: F) -> Result<T, RemoteError>
where
    F: FnOnce() -> Result<T, RemoteError> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|err| RemoteError::Task(err.to_string()))?
}

fn millis(duration: Duration) -> u32 {
    u32::try_from(duration.as_millis()).unwrap_or(u32::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::TcpListener;

    fn credentials_for(port: u16) -> Credentials {
        Credentials {
            host: "127.0.0.1".into(),
            port,
            username: "backup".into(),
            password: Some("secret".into()),
            private_key_path: None,
            private_key_passphrase: None,
        }
    }

    #[tokio::test]
    async fn connect_to_closed_port_is_connection_error() {
        let port = {
            let listener = TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap().port()
        };
        let options = SftpOptions {
            connect_timeout: Duration::from_secs(2),
            ..SftpOptions::default()
        };

        let err = SftpStore::connect(&credentials_for(port), options)
            .await
            .err()
            .expect("nothing listens on the port");

        assert!(err.is_connection_loss());
        assert!(matches!(err, RemoteError::Connection(_)));
    }

    #[test]
    fn path_error_maps_missing_paths() {
        let err = path_error(
            ssh2::Error::new(ssh2::ErrorCode::SFTP(2), "no such file"),
            "/data/a",
        );
        assert!(matches!(err, RemoteError::NotFound(path) if path == "/data/a"));

        let err = path_error(
            ssh2::Error::new(ssh2::ErrorCode::SFTP(3), "denied"),
            "/data/a",
        );
        assert!(matches!(err, RemoteError::Ssh(_)));
    }

    #[test]
    fn millis_saturates() {
        assert_eq!(millis(Duration::from_millis(1500)), 1500);
        assert_eq!(millis(Duration::from_secs(u64::MAX)), u32::MAX);
    }
}
