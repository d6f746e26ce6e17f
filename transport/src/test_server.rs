//! An SSH server on 127.0.0.1 for tests. Exec requests run through `/bin/sh`
//! on this machine and the `sftp` subsystem serves this machine's files.

use std::collections::HashMap;
use std::io::{Read, Seek, SeekFrom, Write};
use std::net::SocketAddr;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use keel_cmd::{ExitStatus, LocalCommand, Process};
use russh::keys::ssh_key::{private::Ed25519Keypair, rand_core::OsRng};
use russh::keys::{PrivateKey, PublicKey};
use russh::server::{self, Auth, Msg, Session};
use russh::{Channel, ChannelId, ChannelMsg, Sig};
use russh_sftp::protocol::{
    Attrs, Data, File, FileAttributes, Handle, Name, OpenFlags, Status, StatusCode, Version,
};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use crate::{SshTransportBuilder, Transport};

pub(crate) const USER: &str = "keel";
pub(crate) const PASSWORD: &str = "secret";

#[derive(Debug, Default)]
struct Log {
    commands: Vec<String>,
    signals: Vec<String>,
}

pub(crate) struct TestServer {
    pub addr: SocketAddr,
    pub host_key: PublicKey,
    pub client_key: PrivateKey,
    log: Arc<Mutex<Log>>,
}

impl TestServer {
    pub async fn start() -> Self {
        let key = PrivateKey::from(Ed25519Keypair::random(&mut OsRng));
        let host_key = key.public_key().clone();
        let client_key = PrivateKey::from(Ed25519Keypair::random(&mut OsRng));
        let authorized = client_key.public_key().clone();

        let config = Arc::new(server::Config {
            keys: vec![key],
            auth_rejection_time: Duration::ZERO,
            auth_rejection_time_initial: Some(Duration::ZERO),
            ..Default::default()
        });
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let log = Arc::new(Mutex::new(Log::default()));

        let shared = log.clone();
        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                let handler = Connection {
                    authorized: authorized.clone(),
                    log: shared.clone(),
                    channels: HashMap::new(),
                    interrupts: HashMap::new(),
                };
                let config = config.clone();
                tokio::spawn(async move {
                    if let Ok(session) = server::run_stream(config, stream, handler).await {
                        let _ = session.await;
                    }
                });
            }
        });

        Self {
            addr,
            host_key,
            client_key,
            log,
        }
    }

    pub fn port(&self) -> u16 {
        self.addr.port()
    }

    /// Password login, trusting whatever `known_hosts` says.
    pub fn builder(&self, known_hosts: &Path, auto_add: bool) -> SshTransportBuilder {
        SshTransportBuilder::new()
            .host("127.0.0.1")
            .port(self.port())
            .user(USER)
            .password_auth(PASSWORD)
            .use_known_hosts(known_hosts, auto_add)
            .connection_timeout(Duration::from_secs(5))
    }

    pub fn transport(&self) -> Transport {
        SshTransportBuilder::new()
            .host("127.0.0.1")
            .port(self.port())
            .user(USER)
            .password_auth(PASSWORD)
            .dont_use_known_hosts()
            .connection_timeout(Duration::from_secs(5))
            .build()
            .unwrap()
    }

    /// Every exec request received so far, across all connections.
    pub fn commands(&self) -> Vec<String> {
        self.log.lock().unwrap().commands.clone()
    }

    pub fn signals(&self) -> Vec<String> {
        self.log.lock().unwrap().signals.clone()
    }
}

struct Connection {
    authorized: PublicKey,
    log: Arc<Mutex<Log>>,
    channels: HashMap<ChannelId, Channel<Msg>>,
    interrupts: HashMap<ChannelId, CancellationToken>,
}

impl server::Handler for Connection {
    type Error = russh::Error;

    async fn auth_password(&mut self, user: &str, password: &str) -> Result<Auth, Self::Error> {
        if user == USER && password == PASSWORD {
            Ok(Auth::Accept)
        } else {
            Ok(Auth::Reject {
                proceed_with_methods: None,
                partial_success: false,
            })
        }
    }

    async fn auth_publickey(&mut self, user: &str, key: &PublicKey) -> Result<Auth, Self::Error> {
        if user == USER && key.key_data() == self.authorized.key_data() {
            Ok(Auth::Accept)
        } else {
            Ok(Auth::Reject {
                proceed_with_methods: None,
                partial_success: false,
            })
        }
    }

    async fn channel_open_session(
        &mut self,
        channel: Channel<Msg>,
        _session: &mut Session,
    ) -> Result<bool, Self::Error> {
        self.channels.insert(channel.id(), channel);
        Ok(true)
    }

    async fn exec_request(
        &mut self,
        id: ChannelId,
        data: &[u8],
        session: &mut Session,
    ) -> Result<(), Self::Error> {
        let command = String::from_utf8_lossy(data).into_owned();
        self.log.lock().unwrap().commands.push(command.clone());

        let Some(channel) = self.channels.remove(&id) else {
            let _ = session.channel_failure(id);
            return Ok(());
        };
        let process = match LocalCommand::new("/bin/sh").args(["-c", command.as_str()]).spawn() {
            Ok(process) => process,
            Err(_) => {
                let _ = session.channel_failure(id);
                return Ok(());
            }
        };
        let _ = session.channel_success(id);

        self.interrupts.insert(id, process.interrupt.clone());
        tokio::spawn(serve_exec(channel, session.handle(), process));
        Ok(())
    }

    async fn signal(
        &mut self,
        id: ChannelId,
        signal: Sig,
        _session: &mut Session,
    ) -> Result<(), Self::Error> {
        self.log.lock().unwrap().signals.push(format!("{signal:?}"));
        if let Some(interrupt) = self.interrupts.get(&id) {
            interrupt.cancel();
        }
        Ok(())
    }

    async fn subsystem_request(
        &mut self,
        id: ChannelId,
        name: &str,
        session: &mut Session,
    ) -> Result<(), Self::Error> {
        match self.channels.remove(&id) {
            Some(channel) if name == "sftp" => {
                let _ = session.channel_success(id);
                russh_sftp::server::run(channel.into_stream(), LocalSftp::default()).await;
            }
            _ => {
                let _ = session.channel_failure(id);
            }
        }
        Ok(())
    }
}

async fn serve_exec(mut channel: Channel<Msg>, handle: server::Handle, process: Process) {
    let id = channel.id();
    let Process {
        stdin,
        mut stdout,
        mut stderr,
        exit,
        ..
    } = process;
    let mut stdin = Some(stdin);
    let mut stdout_open = true;
    let mut stderr_open = true;

    while stdout_open || stderr_open {
        tokio::select! {
            chunk = stdout.recv(), if stdout_open => match chunk {
                Some(chunk) => {
                    let _ = channel.data(&chunk[..]).await;
                }
                None => stdout_open = false,
            },
            chunk = stderr.recv(), if stderr_open => match chunk {
                Some(chunk) => {
                    let _ = channel.extended_data(1, &chunk[..]).await;
                }
                None => stderr_open = false,
            },
            msg = channel.wait() => match msg {
                Some(ChannelMsg::Data { data }) => {
                    if let Some(stdin) = &stdin {
                        let _ = stdin.send(data.to_vec());
                    }
                }
                Some(ChannelMsg::Eof) => stdin = None,
                Some(ChannelMsg::Close) | None => return,
                _ => {}
            },
        }
    }

    let code = match exit.await {
        Ok(Ok(ExitStatus::Code(code))) => code,
        _ => 255,
    };
    let _ = handle.exit_status_request(id, code).await;
    let _ = handle.eof(id).await;
    let _ = handle.close(id).await;
}

/// Serves the local file system, paths taken as given.
#[derive(Default)]
struct LocalSftp {
    files: HashMap<String, std::fs::File>,
    dirs: HashMap<String, Vec<File>>,
    next_handle: u64,
}

impl LocalSftp {
    fn handle(&mut self) -> String {
        self.next_handle += 1;
        self.next_handle.to_string()
    }
}

fn status_code(error: std::io::Error) -> StatusCode {
    match error.kind() {
        std::io::ErrorKind::NotFound => StatusCode::NoSuchFile,
        std::io::ErrorKind::PermissionDenied => StatusCode::PermissionDenied,
        _ => StatusCode::Failure,
    }
}

fn ok(id: u32) -> Status {
    Status {
        id,
        status_code: StatusCode::Ok,
        error_message: "Ok".to_string(),
        language_tag: "en-US".to_string(),
    }
}

impl russh_sftp::server::Handler for LocalSftp {
    type Error = StatusCode;

    fn unimplemented(&self) -> Self::Error {
        StatusCode::OpUnsupported
    }

    async fn init(
        &mut self,
        _version: u32,
        _extensions: HashMap<String, String>,
    ) -> Result<Version, Self::Error> {
        Ok(Version::new())
    }

    async fn stat(&mut self, id: u32, path: String) -> Result<Attrs, Self::Error> {
        let metadata = std::fs::metadata(&path).map_err(status_code)?;
        Ok(Attrs {
            id,
            attrs: FileAttributes::from(&metadata),
        })
    }

    async fn lstat(&mut self, id: u32, path: String) -> Result<Attrs, Self::Error> {
        let metadata = std::fs::symlink_metadata(&path).map_err(status_code)?;
        Ok(Attrs {
            id,
            attrs: FileAttributes::from(&metadata),
        })
    }

    async fn mkdir(
        &mut self,
        id: u32,
        path: String,
        _attrs: FileAttributes,
    ) -> Result<Status, Self::Error> {
        std::fs::create_dir(&path).map_err(status_code)?;
        Ok(ok(id))
    }

    async fn rmdir(&mut self, id: u32, path: String) -> Result<Status, Self::Error> {
        std::fs::remove_dir(&path).map_err(status_code)?;
        Ok(ok(id))
    }

    async fn remove(&mut self, id: u32, filename: String) -> Result<Status, Self::Error> {
        std::fs::remove_file(&filename).map_err(status_code)?;
        Ok(ok(id))
    }

    async fn opendir(&mut self, id: u32, path: String) -> Result<Handle, Self::Error> {
        let mut files = Vec::new();
        for entry in std::fs::read_dir(&path).map_err(status_code)? {
            let entry = entry.map_err(status_code)?;
            let metadata = std::fs::symlink_metadata(entry.path()).map_err(status_code)?;
            files.push(File::new(
                entry.file_name().to_string_lossy().into_owned(),
                FileAttributes::from(&metadata),
            ));
        }
        let handle = self.handle();
        self.dirs.insert(handle.clone(), files);
        Ok(Handle { id, handle })
    }

    async fn readdir(&mut self, id: u32, handle: String) -> Result<Name, Self::Error> {
        match self.dirs.get_mut(&handle) {
            Some(files) if !files.is_empty() => Ok(Name {
                id,
                files: std::mem::take(files),
            }),
            Some(_) => Err(StatusCode::Eof),
            None => Err(StatusCode::Failure),
        }
    }

    async fn open(
        &mut self,
        id: u32,
        filename: String,
        pflags: OpenFlags,
        _attrs: FileAttributes,
    ) -> Result<Handle, Self::Error> {
        let file = std::fs::OpenOptions::new()
            .read(pflags.contains(OpenFlags::READ))
            .write(pflags.contains(OpenFlags::WRITE))
            .append(pflags.contains(OpenFlags::APPEND))
            .truncate(pflags.contains(OpenFlags::TRUNCATE))
            .create(pflags.contains(OpenFlags::CREATE))
            .create_new(pflags.contains(OpenFlags::CREATE | OpenFlags::EXCLUDE))
            .open(&filename)
            .map_err(status_code)?;
        let handle = self.handle();
        self.files.insert(handle.clone(), file);
        Ok(Handle { id, handle })
    }

    async fn read(
        &mut self,
        id: u32,
        handle: String,
        offset: u64,
        len: u32,
    ) -> Result<Data, Self::Error> {
        let file = self.files.get_mut(&handle).ok_or(StatusCode::Failure)?;
        file.seek(SeekFrom::Start(offset)).map_err(status_code)?;
        let mut data = vec![0; len as usize];
        let read = file.read(&mut data).map_err(status_code)?;
        if read == 0 {
            return Err(StatusCode::Eof);
        }
        data.truncate(read);
        Ok(Data { id, data })
    }

    async fn write(
        &mut self,
        id: u32,
        handle: String,
        offset: u64,
        data: Vec<u8>,
    ) -> Result<Status, Self::Error> {
        let file = self.files.get_mut(&handle).ok_or(StatusCode::Failure)?;
        file.seek(SeekFrom::Start(offset)).map_err(status_code)?;
        file.write_all(&data).map_err(status_code)?;
        Ok(ok(id))
    }

    async fn close(&mut self, id: u32, handle: String) -> Result<Status, Self::Error> {
        self.files.remove(&handle);
        self.dirs.remove(&handle);
        Ok(ok(id))
    }

    async fn realpath(&mut self, id: u32, path: String) -> Result<Name, Self::Error> {
        let resolved = std::fs::canonicalize(&path).map_err(status_code)?;
        Ok(Name {
            id,
            files: vec![File::new(
                resolved.to_string_lossy().into_owned(),
                FileAttributes::default(),
            )],
        })
    }

    async fn readlink(&mut self, id: u32, path: String) -> Result<Name, Self::Error> {
        let target = std::fs::read_link(&path).map_err(status_code)?;
        Ok(Name {
            id,
            files: vec![File::new(target.to_string_lossy().into_owned(), FileAttributes::default())],
        })
    }

    /// Argument order as OpenSSH reads it: target first, then the link.
    async fn symlink(
        &mut self,
        id: u32,
        linkpath: String,
        targetpath: String,
    ) -> Result<Status, Self::Error> {
        std::os::unix::fs::symlink(&linkpath, &targetpath).map_err(status_code)?;
        Ok(ok(id))
    }
}
