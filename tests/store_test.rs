//! Disk placement of transferred files, against real temporary directories.

#[cfg(test)]
mod tests {
    use tempfile::TempDir;
    use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream, WriteHalf};
    use xymodem::store::{job_from_path, sanitized_path, store_received};
    use xymodem::{
        new_modem, FileJob, Modem, ModemConfig, ModemFeatures, ReceivedFile, TerminalReader,
        TerminalWriter,
    };

    #[test]
    fn sanitized_path_flattens_separators() {
        let dest = sanitized_path(std::path::Path::new("incoming"), "logs/app/run.log").unwrap();
        assert_eq!(
            dest,
            std::path::Path::new("incoming").join("logs_app_run.log")
        );
    }

    #[test]
    fn sanitized_path_rejects_blank_names() {
        assert!(sanitized_path(std::path::Path::new("."), "").is_err());
    }

    /// A received file whose body is already queued in its pipe.
    async fn received(path: &str, mtime: i64, mode: u32, content: &[u8]) -> ReceivedFile {
        let (body, mut feeder) = tokio::io::simplex(1024);
        feeder.write_all(content).await.unwrap();
        drop(feeder);
        ReceivedFile {
            path: path.to_string(),
            length: content.len() as u64,
            mtime,
            mode,
            body,
        }
    }

    #[tokio::test]
    async fn store_received_writes_body_and_applies_metadata() -> anyhow::Result<()> {
        let tmp = TempDir::new()?;
        let dest = tmp.path().join("report.txt");

        let file = received("reports/q3/report.txt", 86_400, 0o640, b"quarterly numbers").await;
        store_received(file, &dest, true).await?;

        assert_eq!(std::fs::read(&dest)?, b"quarterly numbers");
        let meta = std::fs::metadata(&dest)?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            assert_eq!(meta.permissions().mode() & 0o777, 0o640);
        }
        let mtime = filetime::FileTime::from_last_modification_time(&meta);
        assert_eq!(mtime.unix_seconds(), 86_400);
        Ok(())
    }

    #[tokio::test]
    async fn store_received_can_leave_metadata_alone() -> anyhow::Result<()> {
        let tmp = TempDir::new()?;
        let dest = tmp.path().join("plain.bin");

        let file = received("plain.bin", 86_400, 0o640, b"raw").await;
        store_received(file, &dest, false).await?;

        assert_eq!(std::fs::read(&dest)?, b"raw");
        let meta = std::fs::metadata(&dest)?;
        let mtime = filetime::FileTime::from_last_modification_time(&meta);
        // The declared mtime was not applied; the file keeps its creation time.
        assert_ne!(mtime.unix_seconds(), 86_400);
        Ok(())
    }

    #[tokio::test]
    async fn job_from_path_reads_disk_metadata() -> anyhow::Result<()> {
        let tmp = TempDir::new()?;
        let path = tmp.path().join("payload.bin");
        std::fs::write(&path, b"abcde")?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o600))?;
        }
        filetime::set_file_mtime(&path, filetime::FileTime::from_unix_time(1_700_000_000, 0))?;

        let mut job = job_from_path(&path).await?;
        assert_eq!(job.length, 5);
        assert_eq!(job.mtime, 1_700_000_000);
        #[cfg(unix)]
        assert_eq!(job.mode, 0o600);

        let mut body = Vec::new();
        job.body.read_to_end(&mut body).await?;
        assert_eq!(body, b"abcde");
        Ok(())
    }

    struct Endpoint {
        modem: Modem<WriteHalf<DuplexStream>>,
        _term_reader: TerminalReader,
        _term_writer: TerminalWriter,
    }

    fn endpoint(config: ModemConfig, port: DuplexStream) -> Endpoint {
        let (reader, writer) = tokio::io::split(port);
        let (modem, term_reader, term_writer) = new_modem(config, reader, writer);
        Endpoint {
            modem,
            _term_reader: term_reader,
            _term_writer: term_writer,
        }
    }

    #[tokio::test]
    async fn received_batch_lands_on_disk_with_metadata() -> anyhow::Result<()> {
        let tmp = TempDir::new()?;

        let (near, far) = tokio::io::duplex(4096);
        let mut sender = endpoint(ModemConfig::ymodem(ModemFeatures::CRC), near);
        let mut receiver = endpoint(ModemConfig::ymodem(ModemFeatures::CRC), far);

        let jobs = vec![FileJob {
            path: "logs/app.log".to_string(),
            length: 9,
            mtime: 172_800,
            mode: 0o640,
            body: Box::new(&b"hello log"[..]),
        }];
        let send = tokio::spawn(async move {
            let result = sender.modem.send_list(jobs).await;
            (result, sender)
        });
        tokio::task::yield_now().await;

        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        let receive = tokio::spawn(async move {
            let result = receiver
                .modem
                .receive(move |file| {
                    tx.send(file).expect("collector dropped");
                })
                .await;
            (result, receiver)
        });

        while let Some(file) = rx.recv().await {
            let dest = sanitized_path(tmp.path(), &file.path)?;
            store_received(file, &dest, true).await?;
        }
        receive.await?.0.expect("receive failed");
        send.await?.0.expect("send failed");

        let dest = tmp.path().join("logs_app.log");
        assert_eq!(std::fs::read_to_string(&dest)?, "hello log");
        let meta = std::fs::metadata(&dest)?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            assert_eq!(meta.permissions().mode() & 0o777, 0o640);
        }
        let mtime = filetime::FileTime::from_last_modification_time(&meta);
        assert_eq!(mtime.unix_seconds(), 172_800);
        Ok(())
    }
}
