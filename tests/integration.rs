use std::{sync::Arc, time::Duration};

use genoma_server::{
    client::GenomaClient,
    config::{ServerConfig, WorkerMode},
    registry::Registries,
    server::{codec::ProtocolError, Acceptor, FrameCodec, ServerState},
    utils::ServerError,
};
use tempfile::TempDir;
use tokio::{sync::oneshot, task::JoinHandle, time::timeout};

struct TestServer {
    addr: std::net::SocketAddr,
    state: Arc<ServerState>,
    stop: Option<oneshot::Sender<()>>,
    task: JoinHandle<Result<(), ServerError>>,
    dir: TempDir,
}

impl TestServer {
    async fn start(configure: impl FnOnce(&mut ServerConfig, &TempDir)) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let mut config = ServerConfig::default();
        config.host = "127.0.0.1".into();
        config.port = 0;
        config.metrics_port = 0;
        config.shutdown_grace_secs = 2;
        config.reports_dir = dir.path().join("reports");
        configure(&mut config, &dir);

        let state = ServerState::new(Arc::new(config), Registries::in_memory()).unwrap();
        let acceptor = Acceptor::bind(state.clone()).await.unwrap();
        let addr = acceptor.local_addr().unwrap();
        let (stop, stopped) = oneshot::channel::<()>();
        let task = tokio::spawn(acceptor.run(async move {
            let _ = stopped.await;
        }));

        Self {
            addr,
            state,
            stop: Some(stop),
            task,
            dir,
        }
    }

    async fn shutdown(mut self) {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
        timeout(Duration::from_secs(5), self.task)
            .await
            .expect("acceptor did not stop")
            .unwrap()
            .unwrap();
    }
}

async fn plain_client(server: &TestServer) -> GenomaClient<tokio::net::TcpStream> {
    GenomaClient::connect_plain(server.addr).await.unwrap()
}

#[tokio::test]
async fn test_diagnostic_workflow_over_plain_tcp() {
    let server = TestServer::start(|_, _| {}).await;
    let mut client = plain_client(&server).await;

    assert_eq!(
        client
            .request("REGISTRAR_PACIENTE:1001,Ana,Ruiz,34,ana@example.com,F,Cali,Colombia")
            .await
            .unwrap(),
        "PACIENTE_REGISTRADO:1001"
    );
    assert_eq!(
        client
            .request("CARGAR_VIRUS\n>Zika|Alto\nATCG\n>Rino|Bajo\nGGG\n")
            .await
            .unwrap(),
        "OK: 2 virus guardados (Zika, Rino)"
    );
    assert_eq!(
        client.request("ENVIAR_MUESTRA:1001|2024-01-01|AATCGATCG").await.unwrap(),
        "RESULTADO:Zika,Alto,1,4|Zika,Alto,5,8"
    );
    assert_eq!(
        client.request("DIAGNOSTICAR:1001|2024-02-01|AATCGATGG").await.unwrap(),
        "RESULTADO:Zika,Alto,1,4"
    );

    let diagnoses = client.request("CONSULTAR_DIAGNOSTICOS:1001").await.unwrap();
    assert_eq!(diagnoses.lines().count(), 3);

    let report = client.request("REPORTE_ALTO_RIESGO").await.unwrap();
    let path = report.strip_prefix("OK: Reporte en ").unwrap();
    assert!(path.starts_with(server.dir.path().to_str().unwrap()));
    let csv = std::fs::read_to_string(path).unwrap();
    assert_eq!(csv.lines().count(), 4);

    let report = client.request("REPORTE_MUTACIONES:1001").await.unwrap();
    let path = report.strip_prefix("OK: Reporte en ").unwrap();
    let text = std::fs::read_to_string(path).unwrap();
    assert!(text.contains("[7-7] C -> G (Sustitucion)"));

    client.close().await.unwrap();
    server.shutdown().await;
}

#[tokio::test]
async fn test_command_errors_keep_connection_open() {
    let server = TestServer::start(|_, _| {}).await;
    let mut client = plain_client(&server).await;

    assert_eq!(client.request("NADA").await.unwrap(), "ERROR: Comando desconocido");
    assert!(client
        .request("ENVIAR_MUESTRA:9|ATCG")
        .await
        .unwrap()
        .starts_with("ERROR_MUESTRA:"));
    assert!(client
        .request("REGISTRAR_VIRUS:X|Alto|ATQG")
        .await
        .unwrap()
        .starts_with("ERROR_FASTA:"));
    assert_eq!(client.request("LISTAR_PACIENTES").await.unwrap(), "SIN_PACIENTES");

    assert_eq!(server.state.metrics.error_responses_total.get(), 3);
    server.shutdown().await;
}

#[tokio::test]
async fn test_protocol_violation_closes_connection() {
    let server = TestServer::start(|config, _| config.max_message_size = 128).await;
    let mut client = plain_client(&server).await;

    client.send_raw(&4096u32.to_be_bytes()).await.unwrap();
    let result = timeout(Duration::from_secs(2), client.read_response()).await.unwrap();
    assert!(matches!(result, Err(ProtocolError::ConnectionClosed) | Err(ProtocolError::Io(_))));

    // Other connections are unaffected.
    let mut other = plain_client(&server).await;
    assert_eq!(other.request("LISTAR_PACIENTES").await.unwrap(), "SIN_PACIENTES");
    server.shutdown().await;
}

#[tokio::test]
async fn test_client_codec_matches_server_limit() {
    let server = TestServer::start(|config, _| config.max_message_size = 128).await;
    let mut client = plain_client(&server).await.with_codec(FrameCodec::new(128));

    let oversized = format!("CONSULTAR_PACIENTE:{}", "9".repeat(200));
    assert!(matches!(
        client.request(&oversized).await,
        Err(ProtocolError::MessageTooLarge { max: 128, .. })
    ));
    // Nothing reached the server, so the connection is still usable.
    assert_eq!(client.request("LISTAR_PACIENTES").await.unwrap(), "SIN_PACIENTES");
    server.shutdown().await;
}

#[tokio::test]
async fn test_tls_listener_with_self_signed_certificate() {
    let generated = rcgen::generate_simple_self_signed(vec!["localhost".to_string()]).unwrap();
    let cert_pem = generated.cert.pem();
    let key_pem = generated.key_pair.serialize_pem();

    let server = TestServer::start(|config, dir| {
        let cert_path = dir.path().join("cert.pem");
        let key_path = dir.path().join("key.pem");
        std::fs::write(&cert_path, &cert_pem).unwrap();
        std::fs::write(&key_path, &key_pem).unwrap();
        config.enable_tls = true;
        config.tls_cert_path = cert_path;
        config.tls_key_path = key_path;
    })
    .await;
    assert!(server.state.tls_acceptor.is_some());

    let mut client = GenomaClient::connect_tls(server.addr, "localhost", cert_pem.as_bytes())
        .await
        .unwrap();
    assert_eq!(
        client
            .request("REGISTRAR_PACIENTE:77|Eva|Lopez|41|eva@example.com|F|Quito|Ecuador")
            .await
            .unwrap(),
        "PACIENTE_REGISTRADO:77"
    );
    assert_eq!(
        client.request("CONSULTAR_PACIENTE:77").await.unwrap(),
        "77|Eva|Lopez|41|eva@example.com|F|Quito|Ecuador"
    );

    // A plain client cannot talk to the TLS listener.
    let mut plain = plain_client(&server).await;
    assert!(timeout(Duration::from_secs(2), plain.request("LISTAR_PACIENTES"))
        .await
        .map(|r| r.is_err())
        .unwrap_or(true));

    server.shutdown().await;
}

#[tokio::test]
async fn test_shutdown_closes_idle_sessions() {
    let server = TestServer::start(|_, _| {}).await;
    let mut client = plain_client(&server).await;
    assert_eq!(client.request("LISTAR_PACIENTES").await.unwrap(), "SIN_PACIENTES");
    assert_eq!(server.state.sessions.len(), 1);

    let state = server.state.clone();
    server.shutdown().await;
    assert!(state.sessions.is_empty());
    assert_eq!(state.metrics.active_sessions.get(), 0);

    let result = timeout(Duration::from_secs(2), client.read_response()).await.unwrap();
    assert!(result.is_err());
}

#[tokio::test]
async fn test_bounded_mode_queues_extra_connections() {
    let server = TestServer::start(|config, _| {
        config.worker_mode = WorkerMode::Bounded;
        config.max_connections = 1;
    })
    .await;

    let mut first = plain_client(&server).await;
    assert_eq!(first.request("LISTAR_PACIENTES").await.unwrap(), "SIN_PACIENTES");

    let mut second = plain_client(&server).await;
    let frame = FrameCodec::default().encode("LISTAR_PACIENTES").unwrap();
    second.send_raw(&frame).await.unwrap();
    assert!(timeout(Duration::from_millis(300), second.read_response()).await.is_err());

    first.close().await.unwrap();
    let response = timeout(Duration::from_secs(2), second.read_response())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(response, "SIN_PACIENTES");
    server.shutdown().await;
}
