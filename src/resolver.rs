//! Resolution use cases: decrypt a signature, report a player's timestamp and
//! rewrite a stream URL.
//!
//! Every operation goes through [`PlayerCache::get_or_create`] to obtain the
//! player's analysis, then runs the transforms in a fresh sandbox on a
//! blocking thread (V8 isolates are neither `Send` nor cheap to share).

use std::sync::Arc;

use crate::analyzer::{PlayerScriptAnalyzer, TransformAnalyzer};
use crate::cache::PlayerCache;
use crate::config::Config;
use crate::error::ResolveError;
use crate::fetcher::{HttpPlayerFetcher, PlayerFetcher};
use crate::player::{AnalysisResult, PlayerIdentity};
use crate::sandbox::Sandbox;
use crate::stream_url::StreamUrl;
use crate::types::{
    DecryptSignatureResponse, GetStsResponse, Request, ResolveUrlResponse, Response,
};

/// Outputs of one sandbox run; `None` where no input was given.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Decrypted {
    pub signature: Option<String>,
    pub n: Option<String>,
}

#[derive(Clone)]
pub struct Resolver {
    cache: PlayerCache,
    fetcher: Arc<dyn PlayerFetcher>,
    analyzer: Arc<dyn TransformAnalyzer>,
    sandbox: Sandbox,
}

impl Resolver {
    pub fn new(
        cache: PlayerCache,
        fetcher: Arc<dyn PlayerFetcher>,
        analyzer: Arc<dyn TransformAnalyzer>,
        sandbox: Sandbox,
    ) -> Self {
        Self {
            cache,
            fetcher,
            analyzer,
            sandbox,
        }
    }

    /// Resolver wired to the HTTP fetcher and the pattern analyzer.
    pub fn from_config(config: &Config) -> Result<Self, ResolveError> {
        Ok(Self::new(
            PlayerCache::with_limits(config.cache_capacity, config.cache_ttl),
            Arc::new(HttpPlayerFetcher::new(config)?),
            Arc::new(PlayerScriptAnalyzer),
            Sandbox::new(config.transform_timeout),
        ))
    }

    pub fn cache(&self) -> &PlayerCache {
        &self.cache
    }

    /// Dispatch a validated request to its operation.
    pub async fn handle(&self, request: Request) -> Result<Response, ResolveError> {
        match request {
            Request::DecryptSignature {
                player_url,
                encrypted_signature,
                n_param,
            } => {
                let (decrypted_signature, decrypted_n_sig) = self
                    .decrypt_signature(&encrypted_signature, &n_param, &player_url)
                    .await?;
                Ok(Response::DecryptSignature(DecryptSignatureResponse {
                    decrypted_signature,
                    decrypted_n_sig,
                }))
            }
            Request::GetSts { player_url } => {
                let sts = self.get_signature_timestamp(&player_url).await?;
                Ok(Response::GetSts(GetStsResponse { sts }))
            }
            Request::ResolveUrl {
                player_url,
                stream_url,
                encrypted_signature,
                signature_key,
                n_param,
            } => {
                let resolved_url = self
                    .resolve_url(
                        &stream_url,
                        &player_url,
                        encrypted_signature.as_deref(),
                        &signature_key,
                        n_param.as_deref(),
                    )
                    .await?;
                Ok(Response::ResolveUrl(ResolveUrlResponse { resolved_url }))
            }
        }
    }

    /// Run both transforms of the player at `player_url`.
    pub async fn decrypt_signature(
        &self,
        encrypted_signature: &str,
        n_param: &str,
        player_url: &str,
    ) -> Result<(String, String), ResolveError> {
        let analysis = self.analysis(player_url).await?;
        let decrypted = self
            .run_transforms(
                analysis,
                Some(encrypted_signature.to_string()),
                Some(n_param.to_string()),
            )
            .await?;

        match (decrypted.signature, decrypted.n) {
            (Some(signature), Some(n)) => Ok((signature, n)),
            _ => Err(ResolveError::Execution(
                "sandbox returned no output".to_string(),
            )),
        }
    }

    /// The `signatureTimestamp` of the player at `player_url`.
    pub async fn get_signature_timestamp(&self, player_url: &str) -> Result<String, ResolveError> {
        let analysis = self.analysis(player_url).await?;
        Ok(analysis.timestamp.to_string())
    }

    /// Rewrite `stream_url` with the decrypted signature (under
    /// `signature_key`) and n parameter.
    ///
    /// `n_param` defaults to the URL's own `n` parameter. Steps without an
    /// input are skipped.
    pub async fn resolve_url(
        &self,
        stream_url: &str,
        player_url: &str,
        encrypted_signature: Option<&str>,
        signature_key: &str,
        n_param: Option<&str>,
    ) -> Result<String, ResolveError> {
        if stream_url.trim().is_empty() {
            return Err(ResolveError::missing("stream_url"));
        }
        let analysis = self.analysis(player_url).await?;

        tracing::info!("Resolving URL: {}", stream_url);
        self.decipher_stream(analysis, stream_url, encrypted_signature, signature_key, n_param)
            .await
            .map_err(|e| {
                tracing::error!("Error during URL resolution: {}", e);
                match e {
                    ResolveError::Resolution(_) => e,
                    other => ResolveError::Resolution(other.to_string()),
                }
            })
    }

    async fn decipher_stream(
        &self,
        analysis: Arc<AnalysisResult>,
        stream_url: &str,
        encrypted_signature: Option<&str>,
        signature_key: &str,
        n_param: Option<&str>,
    ) -> Result<String, ResolveError> {
        let mut url = StreamUrl::parse(stream_url)?;
        let n_param = n_param.map(str::to_string).or_else(|| url.param("n"));

        let decrypted = self
            .run_transforms(analysis, encrypted_signature.map(str::to_string), n_param)
            .await?;

        if let Some(signature) = decrypted.signature {
            url.set_param(signature_key, &signature);
        }
        if let Some(n) = decrypted.n {
            url.set_param("n", &n);
        }
        Ok(url.into_string())
    }

    /// Cached analysis for `player_url`, fetching and analyzing on a miss.
    pub async fn analysis(&self, player_url: &str) -> Result<Arc<AnalysisResult>, ResolveError> {
        let identity = PlayerIdentity::from_url(player_url)?;
        let script_url = identity.script_url();
        let fetcher = Arc::clone(&self.fetcher);
        let analyzer = Arc::clone(&self.analyzer);

        self.cache
            .get_or_create(&identity, || async move {
                tracing::info!("Fetching player {} from {}", player_url, script_url);
                let player_js = fetcher.fetch(&script_url).await?;
                tokio::task::spawn_blocking(move || analyzer.analyze(&player_js))
                    .await
                    .map_err(|e| ResolveError::Analysis(format!("analyzer task failed: {}", e)))?
            })
            .await
    }

    async fn run_transforms(
        &self,
        analysis: Arc<AnalysisResult>,
        signature: Option<String>,
        n: Option<String>,
    ) -> Result<Decrypted, ResolveError> {
        if signature.is_none() && n.is_none() {
            return Ok(Decrypted::default());
        }

        let sandbox = self.sandbox.clone();
        tokio::task::spawn_blocking(move || {
            let mut transforms = sandbox.prepare(&analysis)?;
            Ok(Decrypted {
                signature: signature
                    .map(|input| transforms.signature(&input))
                    .transpose()?,
                n: n.map(|input| transforms.n(&input)).transpose()?,
            })
        })
        .await
        .map_err(|e| ResolveError::Execution(format!("sandbox task failed: {}", e)))?
    }
}
