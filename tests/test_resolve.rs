use pollnet::{Error, resolve, resolve_to_any};

#[test]
fn numeric_literal_resolves() {
  let addrs = resolve("127.0.0.1").expect("literal must resolve");
  assert!(addrs.iter().any(|ip| ip.is_loopback()));
}

#[test]
fn localhost_resolves_to_loopback() {
  let addrs = resolve("localhost").expect("localhost must resolve");
  assert!(!addrs.is_empty());
  assert!(addrs.iter().all(|ip| ip.is_loopback()));
}

#[test]
fn first_candidate_is_returned() {
  let all = resolve("localhost").expect("localhost must resolve");
  let any = resolve_to_any("localhost").expect("localhost must resolve");
  assert_eq!(any, all[0]);
}

#[test]
fn unresolvable_host_fails_with_resolution_error() {
  // The .invalid TLD is reserved and guaranteed never to resolve.
  let err = resolve_to_any("unresolvable.invalid").unwrap_err();
  assert!(matches!(err, Error::Resolution { .. }), "got {err}");
}
