use super::*;
use axum::http::HeaderMap;

fn with_authorization(value: &str) -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert("authorization", value.parse().unwrap());
    headers
}

mod extract_bearer_token_tests {
    use super::*;

    #[test]
    fn valid_bearer_token() {
        let headers = with_authorization("Bearer sess_01HZX3");
        assert_eq!(extract_bearer_token(&headers).unwrap(), "sess_01HZX3");
    }

    #[test]
    fn scheme_is_case_insensitive_and_token_trimmed() {
        let headers = with_authorization("bEaReR   sess_01HZX3  ");
        assert_eq!(extract_bearer_token(&headers).unwrap(), "sess_01HZX3");
    }

    #[test]
    fn missing_header() {
        assert_eq!(
            extract_bearer_token(&HeaderMap::new()),
            Err(TokenError::Missing)
        );
    }

    #[test]
    fn rejects_other_schemes_and_bare_tokens() {
        for value in ["Basic dXNlcjpwYXNz", "sess_01HZX3", "Bearer", ""] {
            let headers = with_authorization(value);
            assert_eq!(
                extract_bearer_token(&headers),
                Err(TokenError::InvalidFormat),
                "header value {:?}",
                value
            );
        }
    }

    #[test]
    fn blank_token() {
        let headers = with_authorization("Bearer   ");
        assert_eq!(extract_bearer_token(&headers), Err(TokenError::Empty));
    }

    #[test]
    fn error_messages() {
        assert_eq!(TokenError::Missing.to_string(), "Authorization token not provided");
        assert_eq!(TokenError::Empty.to_string(), "Authorization token is empty");
    }
}

mod session_directory_tests {
    use super::*;

    fn directory() -> SessionDirectory {
        SessionDirectory::from_seeds(&[
            SessionSeed {
                token: "tok-alice".to_string(),
                user_id: "user_alice".to_string(),
                email: Some("alice@example.com".to_string()),
            },
            SessionSeed {
                token: "tok-bob".to_string(),
                user_id: "user_bob".to_string(),
                email: None,
            },
        ])
    }

    #[test]
    fn resolves_known_session() {
        let directory = directory();
        assert_eq!(directory.len(), 2);

        let user = directory
            .resolve(&with_authorization("Bearer tok-alice"))
            .unwrap();
        assert_eq!(user.id, "user_alice");
        assert_eq!(user.email.as_deref(), Some("alice@example.com"));
    }

    #[test]
    fn anonymous_and_unknown_callers() {
        let directory = directory();
        assert!(directory.resolve(&HeaderMap::new()).is_none());
        assert!(directory
            .resolve(&with_authorization("Bearer tok-mallory"))
            .is_none());
        assert!(directory
            .resolve(&with_authorization("Basic tok-alice"))
            .is_none());
    }

    #[test]
    fn revoked_session_no_longer_resolves() {
        let directory = directory();
        assert!(directory.revoke("tok-bob"));
        assert!(!directory.revoke("tok-bob"));
        assert!(directory
            .resolve(&with_authorization("Bearer tok-bob"))
            .is_none());
    }
}
