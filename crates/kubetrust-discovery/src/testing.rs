//! In-memory trust object source for tests

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use kubetrust_pki::CertificateAuthority;

use crate::error::{DiscoveryError, Result};
use crate::source::{TrustObjectSource, Verification};
use crate::token::BootstrapToken;
use crate::trust_object::TrustObject;

pub(crate) const TOKEN: &str = "abcdef.0123456789abcdef";

pub(crate) fn token() -> BootstrapToken {
    BootstrapToken::parse(TOKEN).unwrap()
}

/// A cluster root and its trust object signed with [`TOKEN`]
pub(crate) fn signed_cluster(server: &str) -> (CertificateAuthority, TrustObject) {
    let ca = CertificateAuthority::new("kubernetes").unwrap();
    let mut trust = TrustObject::from_parts(server, ca.ca_cert_pem()).unwrap();
    trust.sign(&token()).unwrap();
    (ca, trust)
}

/// How an endpoint answers
#[derive(Clone)]
pub(crate) enum Answer {
    /// Serve the same object on every fetch; secure fetches only succeed
    /// when the trusted root is `root_der`
    Serve {
        trust: TrustObject,
        root_der: Vec<u8>,
    },
    /// Serve `unsigned` for the first `polls` insecure fetches, then `trust`
    SignatureLag {
        unsigned: TrustObject,
        trust: TrustObject,
        root_der: Vec<u8>,
        polls: usize,
    },
    /// Answer insecure fetches with one object and secure ones with another
    Swap {
        insecure: TrustObject,
        secure: TrustObject,
    },
    /// Always fail with a transport error
    Refuse,
    /// Never answer
    Hang,
}

impl Answer {
    pub(crate) fn serve(ca: &CertificateAuthority, trust: TrustObject) -> Self {
        Self::Serve {
            trust,
            root_der: kubetrust_pki::authority::parse_pem(ca.ca_cert_pem()).unwrap(),
        }
    }
}

struct InFlight(Arc<AtomicUsize>);

impl InFlight {
    fn enter(counter: &Arc<AtomicUsize>) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self(counter.clone())
    }
}

impl Drop for InFlight {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

#[derive(Default)]
pub(crate) struct FakeSource {
    answers: HashMap<String, Answer>,
    pub(crate) in_flight: Arc<AtomicUsize>,
    fetches: Mutex<HashMap<String, usize>>,
}

impl FakeSource {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn with(mut self, endpoint: &str, answer: Answer) -> Self {
        self.answers.insert(endpoint.to_string(), answer);
        self
    }

    pub(crate) fn fetches(&self, endpoint: &str) -> usize {
        self.fetches
            .lock()
            .unwrap()
            .get(endpoint)
            .copied()
            .unwrap_or(0)
    }

    pub(crate) fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    fn count(&self, endpoint: &str) -> usize {
        let mut fetches = self.fetches.lock().unwrap();
        let n = fetches.entry(endpoint.to_string()).or_default();
        *n += 1;
        *n
    }
}

fn check_root(root_der: &[u8], verification: Verification<'_>) -> Result<()> {
    match verification {
        Verification::TrustedRoot(der) if der != root_der => Err(DiscoveryError::Transport(
            "certificate signed by unknown authority".to_string(),
        )),
        _ => Ok(()),
    }
}

#[async_trait]
impl TrustObjectSource for FakeSource {
    async fn fetch(&self, endpoint: &str, verification: Verification<'_>) -> Result<TrustObject> {
        let _guard = InFlight::enter(&self.in_flight);
        let n = self.count(endpoint);
        tokio::task::yield_now().await;

        match self.answers.get(endpoint) {
            Some(Answer::Serve { trust, root_der }) => {
                check_root(root_der, verification)?;
                Ok(trust.clone())
            }
            Some(Answer::SignatureLag {
                unsigned,
                trust,
                root_der,
                polls,
            }) => {
                check_root(root_der, verification)?;
                if n <= *polls {
                    Ok(unsigned.clone())
                } else {
                    Ok(trust.clone())
                }
            }
            Some(Answer::Swap { insecure, secure }) => match verification {
                Verification::Insecure => Ok(insecure.clone()),
                Verification::TrustedRoot(_) => Ok(secure.clone()),
            },
            Some(Answer::Hang) => {
                std::future::pending::<()>().await;
                unreachable!()
            }
            Some(Answer::Refuse) | None => Err(DiscoveryError::Transport(format!(
                "connection to {} refused",
                endpoint
            ))),
        }
    }
}
