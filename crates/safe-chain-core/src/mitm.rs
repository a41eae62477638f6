//! The MITM server (C7): accepts CONNECT, decides blind-tunnel vs.
//! interception via the ecosystem router, terminates TLS with a freshly
//! minted leaf certificate, and replays/rewrites HTTPS requests.

use crate::certs::ManagedMitmCa;
use crate::ecosystem::EcosystemRouter;
use crate::interceptor::Interceptor;
use crate::policy::normalize_host;
use crate::responses::blocked_response;
use crate::responses::text_response;
use crate::state::BlockedRequest;
use crate::state::ProxyState;
use crate::upstream::UpstreamClient;
use anyhow::Context as _;
use anyhow::Result;
use anyhow::anyhow;
use rama_core::Layer;
use rama_core::Service;
use rama_core::error::BoxError;
use rama_core::error::ErrorExt as _;
use rama_core::error::OpaqueError;
use rama_core::extensions::ExtensionsMut;
use rama_core::extensions::ExtensionsRef;
use rama_core::layer::AddInputExtensionLayer;
use rama_core::rt::Executor;
use rama_core::service::service_fn;
use rama_http::Body;
use rama_http::HeaderValue;
use rama_http::Request;
use rama_http::Response;
use rama_http::StatusCode;
use rama_http::Uri;
use rama_http::header::HOST;
use rama_http::layer::remove_header::RemoveRequestHeaderLayer;
use rama_http::layer::remove_header::RemoveResponseHeaderLayer;
use rama_http::matcher::MethodMatcher;
use rama_http_backend::client::proxy::layer::HttpProxyConnector;
use rama_http_backend::server::HttpServer;
use rama_http_backend::server::layer::upgrade::UpgradeLayer;
use rama_http_backend::server::layer::upgrade::Upgraded;
use rama_net::Protocol;
use rama_net::client::EstablishedClientConnection;
use rama_net::http::RequestContext;
use rama_net::proxy::ProxyRequest;
use rama_net::proxy::ProxyTarget;
use rama_net::proxy::StreamForwardService;
use rama_tcp::client::Request as TcpRequest;
use rama_tcp::client::service::TcpConnector;
use rama_tcp::server::TcpListener;
use rama_tls_rustls::client::TlsConnectorDataBuilder;
use rama_tls_rustls::client::TlsConnectorLayer;
use rama_tls_rustls::server::TlsAcceptorLayer;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::info;
use tracing::warn;

/// Everything a CONNECT handler and its inner request handler need: the CA
/// to mint leaf certs, the router to decide interception, the upstream
/// client to replay requests, and the bookkeeping state to record blocks.
pub(crate) struct MitmServices {
    pub(crate) ca: ManagedMitmCa,
    pub(crate) router: EcosystemRouter,
    pub(crate) upstream: UpstreamClient,
    pub(crate) state: Arc<ProxyState>,
}

/// Bind a loopback listener and serve CONNECT/plain-HTTP proxy traffic until
/// the returned join handle is aborted.
pub(crate) async fn serve(
    addr: SocketAddr,
    services: Arc<MitmServices>,
) -> Result<(SocketAddr, tokio::task::JoinHandle<()>)> {
    let listener = TcpListener::build()
        .bind(addr)
        .await
        .map_err(OpaqueError::from)
        .map_err(anyhow::Error::from)
        .with_context(|| format!("bind MITM proxy listener: {addr}"))?;
    let bound_addr = listener
        .local_addr()
        .context("read MITM proxy listener local addr")?;

    let http_service = HttpServer::auto(Executor::new()).service(
        (
            UpgradeLayer::new(
                MethodMatcher::CONNECT,
                service_fn(http_connect_accept),
                service_fn(http_connect_upgraded),
            ),
            RemoveResponseHeaderLayer::hop_by_hop(),
        )
            .into_layer(service_fn(http_plain_proxy)),
    );

    info!("safe-chain MITM proxy listening on {bound_addr}");

    let task = tokio::spawn(async move {
        listener
            .serve(AddInputExtensionLayer::new(services).into_layer(http_service))
            .await;
    });

    Ok((bound_addr, task))
}

async fn http_connect_accept(
    mut req: Request,
) -> Result<(Response, Request), Response> {
    let authority = RequestContext::try_from(&req)
        .map(|ctx| ctx.host_with_port())
        .map_err(|err| text_response(StatusCode::BAD_REQUEST, &format!("missing authority: {err}")))?;

    let host = normalize_host(&authority.host.to_string());
    if host.is_empty() {
        return Err(text_response(StatusCode::BAD_REQUEST, "invalid host"));
    }

    let services = req
        .extensions()
        .get::<Arc<MitmServices>>()
        .cloned()
        .ok_or_else(|| text_response(StatusCode::INTERNAL_SERVER_ERROR, "missing proxy state"))?;

    let interceptor = services.router.interceptor_for_host(&host).cloned();
    info!("CONNECT {host}:{} (intercepted={})", authority.port, interceptor.is_some());

    req.extensions_mut().insert(ProxyTarget(authority));
    req.extensions_mut().insert(interceptor);

    Ok((
        Response::builder()
            .status(StatusCode::OK)
            .body(Body::empty())
            .unwrap_or_else(|_| Response::new(Body::empty())),
        req,
    ))
}

async fn http_connect_upgraded(upgraded: Upgraded) -> Result<(), Infallible> {
    let result: Result<()> = match upgraded.extensions().get::<Option<Interceptor>>().cloned() {
        Some(Some(interceptor)) => mitm_tunnel(upgraded, interceptor).await,
        Some(None) | None => blind_tunnel(upgraded).await.map_err(anyhow::Error::from),
    };
    if let Err(err) = result {
        warn!("CONNECT tunnel error: {err}");
    }
    Ok(())
}

/// Splice a raw TCP tunnel through to the target for non-intercepted hosts.
async fn blind_tunnel(upgraded: Upgraded) -> Result<(), BoxError> {
    let authority = upgraded
        .extensions()
        .get::<ProxyTarget>()
        .map(|target| target.0.clone())
        .ok_or_else(|| OpaqueError::from_display("missing forward authority").into_boxed())?;

    let req = TcpRequest::new_with_extensions(authority.clone(), upgraded.extensions().clone())
        .with_protocol(Protocol::HTTPS);
    let proxy_connector = HttpProxyConnector::optional(TcpConnector::new());
    let tls_config = TlsConnectorDataBuilder::new()
        .with_alpn_protocols_http_auto()
        .build();
    let connector = TlsConnectorLayer::tunnel(None)
        .with_connector_data(tls_config)
        .into_layer(proxy_connector);
    let EstablishedClientConnection { conn: target, .. } =
        connector.connect(req).await.map_err(|err| {
            OpaqueError::from_boxed(err)
                .with_context(|| format!("establish CONNECT tunnel to {authority}"))
                .into_boxed()
        })?;

    let proxy_req = ProxyRequest { source: upgraded, target };
    StreamForwardService::default()
        .serve(proxy_req)
        .await
        .map_err(|err| {
            OpaqueError::from_boxed(err.into())
                .with_context(|| format!("forward CONNECT tunnel to {authority}"))
                .into_boxed()
        })
}

/// Terminate the CONNECT stream with a minted leaf cert and apply the
/// interceptor to every inner HTTPS request.
async fn mitm_tunnel(upgraded: Upgraded, interceptor: Interceptor) -> Result<()> {
    let services = upgraded
        .extensions()
        .get::<Arc<MitmServices>>()
        .cloned()
        .context("missing MITM services")?;
    let authority = upgraded
        .extensions()
        .get::<ProxyTarget>()
        .context("missing proxy target")?
        .0
        .clone();
    let host = normalize_host(&authority.host.to_string());
    let port = authority.port;

    let acceptor_data = match services.ca.tls_acceptor_data_for_host(&host) {
        Ok(data) => data,
        Err(err) => {
            warn!("failed to mint leaf certificate for {host}: {err}");
            return Err(anyhow!("failed to mint leaf certificate for {host}: {err}"));
        }
    };

    let request_ctx = Arc::new(MitmRequestContext { host, port, interceptor, services });

    let http_service = HttpServer::auto(Executor::new()).service(
        (
            RemoveResponseHeaderLayer::hop_by_hop(),
            RemoveRequestHeaderLayer::hop_by_hop(),
        )
            .into_layer(service_fn({
                let request_ctx = request_ctx.clone();
                move |req| {
                    let request_ctx = request_ctx.clone();
                    async move { handle_mitm_request(req, request_ctx).await }
                }
            })),
    );

    let https_service = TlsAcceptorLayer::new(acceptor_data)
        .with_store_client_hello(true)
        .into_layer(http_service);
    https_service
        .serve(upgraded)
        .await
        .map_err(|err| anyhow!("MITM serve error: {err}"))?;
    Ok(())
}

struct MitmRequestContext {
    host: String,
    port: u16,
    interceptor: Interceptor,
    services: Arc<MitmServices>,
}

async fn handle_mitm_request(
    req: Request,
    ctx: Arc<MitmRequestContext>,
) -> Result<Response, Infallible> {
    match forward_intercepted_request(req, &ctx).await {
        Ok(resp) => Ok(resp),
        Err(err) => {
            warn!("MITM request handling failed: {err}");
            Ok(text_response(StatusCode::BAD_GATEWAY, "mitm upstream error"))
        }
    }
}

async fn forward_intercepted_request(
    req: Request,
    ctx: &MitmRequestContext,
) -> Result<Response> {
    let target_url = format!("https://{}{}", ctx.host, path_and_query(req.uri()));
    let handler = ctx.interceptor.handle_request(&target_url);

    if handler.block_response.is_some() {
        if let Some(event) = handler.malware_blocked {
            ctx.services.state.record_blocked(BlockedRequest::from(event));
        }
        return Ok(blocked_response());
    }

    let (mut parts, body) = req.into_parts();
    let authority = authority_header_value(&ctx.host, ctx.port);
    parts.uri = build_https_uri(&authority, &path_and_query(&parts.uri))?;
    parts.headers.insert(HOST, HeaderValue::from_str(&authority)?);
    handler.modify_request_headers(&mut parts.headers);

    let upstream_req = Request::from_parts(parts, body);
    let upstream_resp = ctx.services.upstream.serve(upstream_req).await?;

    if !handler.modifies_response() {
        return Ok(upstream_resp);
    }

    let (mut resp_parts, resp_body) = upstream_resp.into_parts();
    let body_bytes = buffer_body(resp_body).await?;

    let rewritten = if is_gzip_encoded(&resp_parts.headers) {
        let decompressed = gunzip(&body_bytes)?;
        let mutated = handler.modify_body(decompressed, &mut resp_parts.headers);
        gzip(&mutated)?
    } else {
        handler.modify_body(body_bytes, &mut resp_parts.headers)
    };

    resp_parts.headers.insert(
        rama_http::header::CONTENT_LENGTH,
        HeaderValue::from_str(&rewritten.len().to_string())?,
    );
    Ok(Response::from_parts(resp_parts, Body::from(rewritten)))
}

/// Buffer a response body fully; packument rewriting needs the whole JSON
/// document in hand, so this cannot stream chunk-by-chunk like a pass-through.
async fn buffer_body(mut body: Body) -> Result<Vec<u8>> {
    let mut buf = Vec::new();
    loop {
        let chunk = body
            .chunk()
            .await
            .map_err(|err| anyhow!("failed to read response body: {err}"))?;
        let Some(chunk) = chunk else {
            break;
        };
        buf.extend_from_slice(&chunk);
    }
    Ok(buf)
}

fn is_gzip_encoded(headers: &rama_http::HeaderMap) -> bool {
    headers
        .get(rama_http::header::CONTENT_ENCODING)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.eq_ignore_ascii_case("gzip"))
        .unwrap_or(false)
}

fn gunzip(bytes: &[u8]) -> Result<Vec<u8>> {
    use flate2::read::GzDecoder;
    use std::io::Read;
    let mut out = Vec::new();
    GzDecoder::new(bytes)
        .read_to_end(&mut out)
        .context("failed to gunzip upstream response body")?;
    Ok(out)
}

fn gzip(bytes: &[u8]) -> Result<Vec<u8>> {
    use flate2::Compression;
    use flate2::write::GzEncoder;
    use std::io::Write;
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder
        .write_all(bytes)
        .context("failed to gzip rewritten response body")?;
    encoder.finish().context("failed to finalize gzip stream")
}

async fn http_plain_proxy(req: Request) -> Result<Response, Infallible> {
    let services = match req.extensions().get::<Arc<MitmServices>>().cloned() {
        Some(services) => services,
        None => return Ok(text_response(StatusCode::INTERNAL_SERVER_ERROR, "missing proxy state")),
    };
    match services.upstream.serve(req).await {
        Ok(resp) => Ok(resp),
        Err(err) => {
            warn!("plain-HTTP proxy upstream error: {err}");
            Ok(text_response(StatusCode::BAD_GATEWAY, "upstream error"))
        }
    }
}

fn authority_header_value(host: &str, port: u16) -> String {
    if host.contains(':') {
        if port == 443 {
            format!("[{host}]")
        } else {
            format!("[{host}]:{port}")
        }
    } else if port == 443 {
        host.to_string()
    } else {
        format!("{host}:{port}")
    }
}

fn build_https_uri(authority: &str, path: &str) -> Result<Uri> {
    Ok(format!("https://{authority}{path}").parse()?)
}

fn path_and_query(uri: &Uri) -> String {
    uri.path_and_query()
        .map(rama_http::uri::PathAndQuery::as_str)
        .unwrap_or("/")
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn authority_header_value_omits_default_https_port() {
        assert_eq!(authority_header_value("registry.npmjs.org", 443), "registry.npmjs.org");
        assert_eq!(authority_header_value("registry.npmjs.org", 8443), "registry.npmjs.org:8443");
    }

}
