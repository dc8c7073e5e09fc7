//! Connection pool construction, with optional TLS to the backing store.

use anyhow::{Context, Result, bail};
use deadpool_postgres::{Config as PgConfig, ManagerConfig, Pool, RecyclingMethod, Runtime};
use rustls::pki_types::CertificateDer;
use rustls::{ClientConfig, RootCertStore};
use stark_common::args::PostgresArgs;
use tokio_postgres::NoTls;
use tokio_postgres_rustls::MakeRustlsConnect;

pub fn install_rustls_provider() {
    // Safe to call more than once; only the first install wins.
    let _ = rustls::crypto::aws_lc_rs::default_provider().install_default();
}

pub async fn create_pool(args: &PostgresArgs) -> Result<Pool> {
    let mut cfg = PgConfig::new();
    cfg.host = Some(args.postgres_host.clone());
    cfg.port = Some(args.postgres_port);
    cfg.dbname = Some(args.postgres_database.clone());
    cfg.user = Some(args.postgres_username.clone());
    cfg.password = args
        .postgres_password
        .clone()
        .or_else(|| std::env::var("POSTGRES_PASSWORD").ok());
    cfg.manager = Some(ManagerConfig {
        recycling_method: RecyclingMethod::Fast,
    });

    let pool = match &args.postgres_ca_cert_path {
        Some(path) => {
            install_rustls_provider();
            let pem = std::fs::read(path)
                .with_context(|| format!("failed to read CA bundle at {path}"))?;
            let tls = make_rustls(parse_ca_certs(&pem)?)?;
            cfg.create_pool(Some(Runtime::Tokio1), tls)
                .context("failed to create TLS postgres pool")?
        }
        None => cfg
            .create_pool(Some(Runtime::Tokio1), NoTls)
            .context("failed to create postgres pool")?,
    };
    Ok(pool)
}

fn make_rustls(extra_roots: Vec<CertificateDer<'static>>) -> Result<MakeRustlsConnect> {
    let mut roots = RootCertStore::empty();
    for cert in rustls_native_certs::load_native_certs().certs {
        let _ = roots.add(cert);
    }
    for cert in extra_roots {
        roots.add(cert)?;
    }
    let config = ClientConfig::builder()
        .with_root_certificates(roots)
        .with_no_client_auth();
    Ok(MakeRustlsConnect::new(config))
}

fn parse_ca_certs(bytes: &[u8]) -> Result<Vec<CertificateDer<'static>>> {
    if bytes.starts_with(b"-----BEGIN") {
        let mut rd: &[u8] = bytes;
        let mut out = Vec::new();
        for item in rustls_pemfile::read_all(&mut rd) {
            let item = item.context("failed to parse PEM bundle")?;
            if let rustls_pemfile::Item::X509Certificate(der) = item {
                out.push(der);
            }
        }
        if out.is_empty() {
            bail!("no X509 certificates found in provided PEM");
        }
        Ok(out)
    } else {
        Ok(vec![CertificateDer::from(bytes.to_vec())])
    }
}
