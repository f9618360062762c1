//! Authentication challenges raised by transports.
//!
//! When a server asks for credentials, or presents a certificate chain that needs a trust
//! decision, the transport hands a [`Challenge`] to the session. A custom handler installed
//! with [`Builder::with_auth_challenge`](crate::session::Builder::with_auth_challenge)
//! decides the answer outright. Without one the session:
//!
//! * cancels any challenge which has already failed once,
//! * answers password challenges with the request's basic credentials,
//! * evaluates server trust with the policy registered for the host, trusting the server
//!   when no policy is registered.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use bytes::Bytes;
use tracing::{debug, trace, warn};

use crate::request::{Authorization, Request};

/// The kind of authentication a challenge asks for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AuthenticationMethod {
    /// HTTP basic.
    HttpBasic,
    /// HTTP digest.
    HttpDigest,
    /// NTLM.
    Ntlm,
    /// Kerberos or NTLM via SPNEGO.
    Negotiate,
    /// A client certificate.
    ClientCertificate,
    /// A trust decision about the server's certificate chain.
    ServerTrust,
    /// An HTML form.
    HtmlForm,
    /// Unspecified.
    Default,
}

/// How long a credential is kept.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Persistence {
    /// Used for this challenge only.
    None,
    /// Kept for the lifetime of the session.
    #[default]
    ForSession,
    /// Stored permanently.
    Permanent,
}

/// The certificate chain a server presented, leaf first, DER encoded.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ServerTrust {
    /// Certificates, leaf first.
    pub certificates: Vec<Bytes>,
}

impl ServerTrust {
    /// A trust object for the given chain.
    pub fn new(certificates: Vec<Bytes>) -> Self {
        ServerTrust { certificates }
    }
}

/// A credential offered in answer to a challenge.
#[derive(Clone, PartialEq, Eq)]
pub enum Credential {
    /// A user name and password.
    Password {
        /// User name.
        user: String,
        /// Password, possibly empty.
        password: String,
        /// How long the credential is kept.
        persistence: Persistence,
    },
    /// Accept the server's certificate chain.
    Trust(ServerTrust),
}

impl Credential {
    /// A password credential kept for the session.
    pub fn password(user: impl Into<String>, password: impl Into<String>) -> Self {
        Credential::Password {
            user: user.into(),
            password: password.into(),
            persistence: Persistence::ForSession,
        }
    }

    /// Whether this is a password credential with a non-empty password.
    pub fn has_password(&self) -> bool {
        matches!(self, Credential::Password { password, .. } if !password.is_empty())
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Credential::Password {
                user, persistence, ..
            } => f
                .debug_struct("Password")
                .field("user", user)
                .field("password", &"<redacted>")
                .field("persistence", persistence)
                .finish(),
            Credential::Trust(trust) => f
                .debug_tuple("Trust")
                .field(&trust.certificates.len())
                .finish(),
        }
    }
}

/// The answer to a challenge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Disposition {
    /// Use the supplied credential.
    UseCredential,
    /// Let the transport do what it would do with no handler.
    PerformDefaultHandling,
    /// Cancel the challenge, and with it the transfer.
    CancelAuthenticationChallenge,
    /// Reject this protection space and let the transport try the next one.
    RejectProtectionSpace,
}

/// A request for credentials.
#[derive(Debug, Clone)]
pub struct Challenge {
    /// Host of the protection space.
    pub host: String,
    /// Port of the protection space.
    pub port: u16,
    /// Kind of authentication requested.
    pub method: AuthenticationMethod,
    /// Realm, if the server named one.
    pub realm: Option<String>,
    /// How many times this challenge has already failed.
    pub previous_failure_count: u32,
    /// A credential the transport already has for this space.
    pub proposed_credential: Option<Credential>,
    /// The server's chain, for [`AuthenticationMethod::ServerTrust`] challenges.
    pub server_trust: Option<ServerTrust>,
}

impl Challenge {
    /// A first challenge for the given host and method.
    pub fn new(host: impl Into<String>, port: u16, method: AuthenticationMethod) -> Self {
        Challenge {
            host: host.into(),
            port,
            method,
            realm: None,
            previous_failure_count: 0,
            proposed_credential: None,
            server_trust: None,
        }
    }
}

/// Custom challenge handler.
pub type ChallengeHandler =
    Arc<dyn Fn(&Challenge) -> (Disposition, Option<Credential>) + Send + Sync + 'static>;

/// Decides whether to trust a server's certificate chain.
pub trait ServerTrustPolicy: Send + Sync + 'static {
    /// Return `true` to trust the server.
    fn evaluate(&self, trust: &ServerTrust, host: &str) -> bool;
}

impl<F> ServerTrustPolicy for F
where
    F: Fn(&ServerTrust, &str) -> bool + Send + Sync + 'static,
{
    fn evaluate(&self, trust: &ServerTrust, host: &str) -> bool {
        (self)(trust, host)
    }
}

/// Trust a server only if its chain contains one of these certificates.
#[derive(Debug, Clone, Default)]
pub struct PinnedCertificates(pub Vec<Bytes>);

impl ServerTrustPolicy for PinnedCertificates {
    fn evaluate(&self, trust: &ServerTrust, _host: &str) -> bool {
        trust
            .certificates
            .iter()
            .any(|certificate| self.0.contains(certificate))
    }
}

/// Trust every server.
#[derive(Debug, Clone, Copy, Default)]
pub struct DisableEvaluation;

impl ServerTrustPolicy for DisableEvaluation {
    fn evaluate(&self, _trust: &ServerTrust, _host: &str) -> bool {
        true
    }
}

/// Server trust policies by host name.
pub(crate) type TrustPolicies = HashMap<String, Arc<dyn ServerTrustPolicy>>;

/// Answer a challenge the way a session does when no custom handler is installed.
pub(crate) fn default_handling(
    challenge: &Challenge,
    request: Option<&Request>,
    policies: &TrustPolicies,
) -> (Disposition, Option<Credential>) {
    if challenge.previous_failure_count > 0 {
        warn!(
            host = %challenge.host,
            failures = challenge.previous_failure_count,
            "challenge already failed, cancelling"
        );
        return (Disposition::CancelAuthenticationChallenge, None);
    }

    let mut credential = challenge.proposed_credential.clone();

    let wants_password = matches!(
        challenge.method,
        AuthenticationMethod::HttpBasic | AuthenticationMethod::HttpDigest
    );
    if wants_password && !credential.as_ref().is_some_and(Credential::has_password) {
        if let Some(Authorization::Basic { user, password }) = request.map(Request::authorization)
        {
            trace!(host = %challenge.host, "answering with request credentials");
            credential = Some(Credential::password(user.clone(), password.clone()));
        }
    }

    if credential.is_none() && challenge.method == AuthenticationMethod::ServerTrust {
        if let Some(trust) = &challenge.server_trust {
            credential = match policies.get(&challenge.host) {
                Some(policy) if !policy.evaluate(trust, &challenge.host) => {
                    debug!(host = %challenge.host, "server trust rejected by policy");
                    None
                }
                _ => Some(Credential::Trust(trust.clone())),
            };
        }
    }

    match credential {
        Some(credential) => (Disposition::UseCredential, Some(credential)),
        None => (Disposition::CancelAuthenticationChallenge, None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn trust() -> ServerTrust {
        ServerTrust::new(vec![Bytes::from_static(b"leaf"), Bytes::from_static(b"root")])
    }

    fn request_with_basic() -> Request {
        let mut builder = Request::builder("https://example.com/".parse().unwrap());
        builder.set_basic_authorization("ada", "lovelace");
        builder.build()
    }

    #[test]
    fn repeated_failures_cancel() {
        let mut challenge = Challenge::new("example.com", 443, AuthenticationMethod::HttpBasic);
        challenge.previous_failure_count = 1;
        let request = request_with_basic();
        let (disposition, credential) =
            default_handling(&challenge, Some(&request), &TrustPolicies::new());
        assert_eq!(disposition, Disposition::CancelAuthenticationChallenge);
        assert!(credential.is_none());
    }

    #[test]
    fn basic_challenge_uses_request_credentials() {
        let challenge = Challenge::new("example.com", 443, AuthenticationMethod::HttpBasic);
        let request = request_with_basic();
        let (disposition, credential) =
            default_handling(&challenge, Some(&request), &TrustPolicies::new());
        assert_eq!(disposition, Disposition::UseCredential);
        assert_eq!(credential, Some(Credential::password("ada", "lovelace")));
    }

    #[test]
    fn proposed_credential_with_password_wins() {
        let mut challenge = Challenge::new("example.com", 443, AuthenticationMethod::HttpDigest);
        challenge.proposed_credential = Some(Credential::password("grace", "hopper"));
        let request = request_with_basic();
        let (_, credential) = default_handling(&challenge, Some(&request), &TrustPolicies::new());
        assert_eq!(credential, Some(Credential::password("grace", "hopper")));
    }

    #[test]
    fn basic_challenge_without_credentials_cancels() {
        let challenge = Challenge::new("example.com", 443, AuthenticationMethod::HttpBasic);
        let (disposition, _) = default_handling(&challenge, None, &TrustPolicies::new());
        assert_eq!(disposition, Disposition::CancelAuthenticationChallenge);
    }

    #[test]
    fn server_trust_follows_policy() {
        let mut challenge = Challenge::new("example.com", 443, AuthenticationMethod::ServerTrust);
        challenge.server_trust = Some(trust());

        let (disposition, credential) = default_handling(&challenge, None, &TrustPolicies::new());
        assert_eq!(disposition, Disposition::UseCredential);
        assert_eq!(credential, Some(Credential::Trust(trust())));

        let mut policies = TrustPolicies::new();
        policies.insert(
            "example.com".into(),
            Arc::new(PinnedCertificates(vec![Bytes::from_static(b"other")])),
        );
        let (disposition, _) = default_handling(&challenge, None, &policies);
        assert_eq!(disposition, Disposition::CancelAuthenticationChallenge);

        policies.insert(
            "example.com".into(),
            Arc::new(PinnedCertificates(vec![Bytes::from_static(b"root")])),
        );
        let (disposition, _) = default_handling(&challenge, None, &policies);
        assert_eq!(disposition, Disposition::UseCredential);
    }

    #[test]
    fn closures_are_policies() {
        let policy: Arc<dyn ServerTrustPolicy> =
            Arc::new(|_: &ServerTrust, host: &str| host.ends_with(".internal"));
        assert!(policy.evaluate(&trust(), "db.internal"));
        assert!(!policy.evaluate(&trust(), "example.com"));
        assert!(DisableEvaluation.evaluate(&trust(), "example.com"));
    }

    #[test]
    fn password_is_redacted() {
        let credential = Credential::password("ada", "lovelace");
        assert!(!format!("{credential:?}").contains("lovelace"));
        assert!(credential.has_password());
        assert!(!Credential::password("ada", "").has_password());
    }
}
