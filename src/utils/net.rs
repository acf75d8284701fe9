use crate::Error;
use crate::Result;

/// Splits a member list such as `"node1:8868, node2:8868"` into endpoints.
///
/// Scheme prefixes are stripped; every entry must be `host:port` with a
/// numeric port. Duplicates are removed while keeping the first occurrence.
pub fn parse_members(list: &str) -> Result<Vec<String>> {
    normalize_members(list.split(','))
}

pub(crate) fn normalize_members<I, S>(members: I) -> Result<Vec<String>>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut endpoints: Vec<String> = Vec::new();
    for raw in members {
        let trimmed = raw.as_ref().trim();
        if trimmed.is_empty() {
            continue;
        }
        let endpoint = address_str(trimmed);
        validate_endpoint(&endpoint)?;
        if !endpoints.contains(&endpoint) {
            endpoints.push(endpoint);
        }
    }

    if endpoints.is_empty() {
        return Err(Error::InvalidArgument("at least one cluster member required".into()));
    }
    Ok(endpoints)
}

/// accept ip either like 127.0.0.1:8868 or docker host name: node1:8868
pub(crate) fn address_str(addr: &str) -> String {
    addr.trim_start_matches("http://")
        .trim_start_matches("https://")
        .trim_end_matches('/')
        .to_string()
}

fn validate_endpoint(endpoint: &str) -> Result<()> {
    let (host, port) = endpoint
        .rsplit_once(':')
        .ok_or_else(|| Error::InvalidArgument(format!("member `{endpoint}` is not host:port")))?;
    if host.is_empty() {
        return Err(Error::InvalidArgument(format!("member `{endpoint}` has an empty host")));
    }
    port.parse::<u16>()
        .map_err(|_| Error::InvalidArgument(format!("member `{endpoint}` has an invalid port")))?;
    Ok(())
}
