//! In-process stand-in for the Kubernetes API server.
//!
//! Serves the REST paths kube-rs uses (get, list, watch, create, replace,
//! patch, delete) for any group and resource, keeping objects in memory.
//! Watches are accepted and then stay open without events, which is enough
//! for reflectors to report their initial sync.

use std::collections::{BTreeMap, HashMap};
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use axum::Router;
use axum::body::{Body, Bytes};
use axum::extract::{Query, State};
use axum::http::{HeaderMap, Method, StatusCode, Uri, header};
use axum::response::{IntoResponse, Response};
use parking_lot::Mutex;
use serde_json::{Value, json};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

use kube::core::{Expression, Selector, SelectorExt};

/// One request as seen by the server.
#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub method: Method,
    pub path: String,
    pub watch: bool,
}

/// Where a request points: a collection, optionally one object in it.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
struct Target {
    /// `api/v1/secrets`, `apis/coordination.k8s.io/v1/leases`, ...
    collection: String,
    namespace: Option<String>,
    name: Option<String>,
}

type ObjectId = (String, Option<String>, String);

#[derive(Default)]
struct ServerState {
    objects: Mutex<BTreeMap<ObjectId, Value>>,
    requests: Mutex<Vec<RecordedRequest>>,
    resource_version: AtomicU64,
    /// Requests whose path contains this fragment fail with 500.
    outage: Mutex<Option<String>>,
}

impl ServerState {
    fn next_resource_version(&self) -> String {
        (self.resource_version.fetch_add(1, Ordering::SeqCst) + 1).to_string()
    }
}

pub struct FakeApiServer {
    addr: SocketAddr,
    state: Arc<ServerState>,
    task: JoinHandle<()>,
}

impl FakeApiServer {
    pub async fn start() -> Self {
        let state = Arc::new(ServerState::default());
        let app = Router::new().fallback(handle).with_state(state.clone());
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let task = tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        Self { addr, state, task }
    }

    /// Client configuration pointing at this server.
    pub fn kube_config(&self) -> kube::Config {
        kube::Config::new(format!("http://{}", self.addr).parse().unwrap())
    }

    pub fn client(&self) -> kube::Client {
        kube::Client::try_from(self.kube_config()).unwrap()
    }

    /// Stored object, if any.
    pub fn object(&self, collection: &str, namespace: Option<&str>, name: &str) -> Option<Value> {
        self.state
            .objects
            .lock()
            .get(&(
                collection.to_string(),
                namespace.map(str::to_string),
                name.to_string(),
            ))
            .cloned()
    }

    /// Store an object directly, bypassing the HTTP surface.
    pub fn insert(&self, collection: &str, namespace: Option<&str>, mut object: Value) {
        let name = object["metadata"]["name"].as_str().unwrap().to_string();
        object["metadata"]["resourceVersion"] = json!(self.state.next_resource_version());
        self.state.objects.lock().insert(
            (collection.to_string(), namespace.map(str::to_string), name),
            object,
        );
    }

    /// Fail every request whose path contains `fragment` until [`Self::recover`].
    pub fn fail_requests(&self, fragment: &str) {
        *self.state.outage.lock() = Some(fragment.to_string());
    }

    pub fn recover(&self) {
        *self.state.outage.lock() = None;
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.state.requests.lock().clone()
    }

    /// Whether any request hit a path containing `fragment`.
    pub fn saw_request(&self, fragment: &str) -> bool {
        self.state
            .requests
            .lock()
            .iter()
            .any(|r| r.path.contains(fragment))
    }
}

impl Drop for FakeApiServer {
    fn drop(&mut self) {
        self.task.abort();
    }
}

fn parse_target(path: &str) -> Option<Target> {
    let segments: Vec<&str> = path.trim_matches('/').split('/').collect();
    let (prefix, rest) = match segments.as_slice() {
        ["api", version, rest @ ..] => (format!("api/{version}"), rest),
        ["apis", group, version, rest @ ..] => (format!("apis/{group}/{version}"), rest),
        _ => return None,
    };
    let (namespace, resource) = match rest {
        ["namespaces", ns, resource @ ..] if !resource.is_empty() => (Some(ns.to_string()), resource),
        resource => (None, resource),
    };
    let (plural, name) = match resource {
        [plural] => (*plural, None),
        // `<name>/status` and other subresources address the object itself.
        [plural, name, ..] => (*plural, Some(name.to_string())),
        _ => return None,
    };
    Some(Target {
        collection: format!("{prefix}/{plural}"),
        namespace,
        name,
    })
}

fn status(code: StatusCode, reason: &str, message: String) -> Response {
    let body = json!({
        "kind": "Status",
        "apiVersion": "v1",
        "metadata": {},
        "status": "Failure",
        "message": message,
        "reason": reason,
        "code": code.as_u16(),
    });
    (code, axum::Json(body)).into_response()
}

fn not_found(target: &Target) -> Response {
    status(
        StatusCode::NOT_FOUND,
        "NotFound",
        format!(
            "{} {:?} not found",
            target.collection,
            target.name.as_deref().unwrap_or_default()
        ),
    )
}

/// RFC 7386 JSON merge patch. Strategic and apply patches are treated the same.
fn merge(target: &mut Value, patch: &Value) {
    match (target, patch) {
        (Value::Object(target), Value::Object(patch)) => {
            for (key, value) in patch {
                if value.is_null() {
                    target.remove(key);
                } else {
                    merge(target.entry(key.clone()).or_insert(Value::Null), value);
                }
            }
        }
        (target, patch) => *target = patch.clone(),
    }
}

/// Server side of `labelSelector`: the equality-based subset the clients send.
fn parse_label_selector(raw: &str) -> Selector {
    raw.split(',')
        .map(str::trim)
        .filter(|requirement| !requirement.is_empty())
        .map(|requirement| {
            if let Some((key, value)) = requirement.split_once("!=") {
                Expression::NotEqual(key.to_string(), value.to_string())
            } else if let Some((key, value)) = requirement
                .split_once("==")
                .or_else(|| requirement.split_once('='))
            {
                Expression::Equal(key.to_string(), value.to_string())
            } else if let Some(key) = requirement.strip_prefix('!') {
                Expression::DoesNotExist(key.to_string())
            } else {
                Expression::Exists(requirement.to_string())
            }
        })
        .collect()
}

fn labels_of(object: &Value) -> BTreeMap<String, String> {
    object["metadata"]["labels"]
        .as_object()
        .map(|labels| {
            labels
                .iter()
                .filter_map(|(k, v)| v.as_str().map(|v| (k.clone(), v.to_string())))
                .collect()
        })
        .unwrap_or_default()
}

async fn handle(
    State(state): State<Arc<ServerState>>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    Query(query): Query<HashMap<String, String>>,
    body: Bytes,
) -> Response {
    let watch = query
        .get("watch")
        .is_some_and(|w| w == "true" || w == "1");
    state.requests.lock().push(RecordedRequest {
        method: method.clone(),
        path: uri.path().to_string(),
        watch,
    });

    let failing = state
        .outage
        .lock()
        .as_deref()
        .is_some_and(|fragment| uri.path().contains(fragment));
    if failing {
        return status(
            StatusCode::INTERNAL_SERVER_ERROR,
            "InternalError",
            format!("injected failure for {}", uri.path()),
        );
    }

    let Some(target) = parse_target(uri.path()) else {
        return status(
            StatusCode::NOT_FOUND,
            "NotFound",
            format!("no route for {}", uri.path()),
        );
    };
    let body: Option<Value> = serde_json::from_slice(&body).ok();

    match (method.as_str(), target.name.clone()) {
        ("GET", None) if watch => {
            // Open, silent watch stream.
            let stream = futures::stream::pending::<Result<Bytes, Infallible>>();
            Response::builder()
                .status(StatusCode::OK)
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from_stream(stream))
                .unwrap()
        }
        ("GET", None) => {
            let selector = query
                .get("labelSelector")
                .map(|raw| parse_label_selector(raw));
            let items: Vec<Value> = state
                .objects
                .lock()
                .iter()
                .filter(|((collection, namespace, _), _)| {
                    *collection == target.collection
                        && (target.namespace.is_none() || *namespace == target.namespace)
                })
                .map(|(_, object)| object)
                .filter(|object| {
                    selector
                        .as_ref()
                        .is_none_or(|selector| selector.matches(&labels_of(object)))
                })
                .cloned()
                .collect();
            let body = json!({
                "apiVersion": "v1",
                "kind": "List",
                "metadata": { "resourceVersion": state.resource_version.load(Ordering::SeqCst).to_string() },
                "items": items,
            });
            (StatusCode::OK, axum::Json(body)).into_response()
        }
        ("GET", Some(name)) => {
            let id = (target.collection.clone(), target.namespace.clone(), name);
            match state.objects.lock().get(&id) {
                Some(object) => (StatusCode::OK, axum::Json(object.clone())).into_response(),
                None => not_found(&target),
            }
        }
        ("POST", None) => {
            let Some(mut object) = body else {
                return status(StatusCode::BAD_REQUEST, "BadRequest", "invalid body".into());
            };
            let Some(name) = object["metadata"]["name"].as_str().map(str::to_string) else {
                return status(StatusCode::BAD_REQUEST, "BadRequest", "name required".into());
            };
            let id = (target.collection.clone(), target.namespace.clone(), name.clone());
            let mut objects = state.objects.lock();
            if objects.contains_key(&id) {
                return status(
                    StatusCode::CONFLICT,
                    "AlreadyExists",
                    format!("{} {name:?} already exists", target.collection),
                );
            }
            if let Some(ns) = &target.namespace {
                object["metadata"]["namespace"] = json!(ns);
            }
            object["metadata"]["uid"] = json!(format!("uid-{name}"));
            object["metadata"]["resourceVersion"] = json!(state.next_resource_version());
            objects.insert(id, object.clone());
            (StatusCode::CREATED, axum::Json(object)).into_response()
        }
        ("PUT", Some(name)) => {
            let Some(mut object) = body else {
                return status(StatusCode::BAD_REQUEST, "BadRequest", "invalid body".into());
            };
            let id = (target.collection.clone(), target.namespace.clone(), name);
            let mut objects = state.objects.lock();
            let Some(existing) = objects.get(&id) else {
                return not_found(&target);
            };
            object["metadata"]["uid"] = existing["metadata"]["uid"].clone();
            object["metadata"]["resourceVersion"] = json!(state.next_resource_version());
            objects.insert(id, object.clone());
            (StatusCode::OK, axum::Json(object)).into_response()
        }
        ("PATCH", Some(name)) => {
            let Some(patch) = body else {
                return status(StatusCode::BAD_REQUEST, "BadRequest", "invalid body".into());
            };
            let id = (target.collection.clone(), target.namespace.clone(), name);
            let apply = headers
                .get(header::CONTENT_TYPE)
                .is_some_and(|ct| ct.as_bytes().starts_with(b"application/apply-patch"));
            let mut objects = state.objects.lock();
            if apply && !objects.contains_key(&id) {
                objects.insert(id.clone(), json!({}));
            }
            let Some(object) = objects.get_mut(&id) else {
                return not_found(&target);
            };
            merge(object, &patch);
            if let Some(ns) = &target.namespace {
                object["metadata"]["namespace"] = json!(ns);
            }
            object["metadata"]["resourceVersion"] = json!(state.next_resource_version());
            (StatusCode::OK, axum::Json(object.clone())).into_response()
        }
        ("DELETE", Some(name)) => {
            let id = (target.collection.clone(), target.namespace.clone(), name);
            match state.objects.lock().remove(&id) {
                Some(object) => (StatusCode::OK, axum::Json(object)).into_response(),
                None => not_found(&target),
            }
        }
        (_, _) => status(
            StatusCode::METHOD_NOT_ALLOWED,
            "MethodNotAllowed",
            format!("{method} not supported on {}", uri.path()),
        ),
    }
}

#[test]
fn test_parse_target() {
    let secret = parse_target("/api/v1/namespaces/openshift-gitops/secrets/cluster1").unwrap();
    assert_eq!(secret.collection, "api/v1/secrets");
    assert_eq!(secret.namespace.as_deref(), Some("openshift-gitops"));
    assert_eq!(secret.name.as_deref(), Some("cluster1"));

    let clusters = parse_target("/apis/cluster.open-cluster-management.io/v1/managedclusters").unwrap();
    assert_eq!(
        clusters.collection,
        "apis/cluster.open-cluster-management.io/v1/managedclusters"
    );
    assert!(clusters.namespace.is_none());
    assert!(clusters.name.is_none());

    assert!(parse_target("/version").is_none());
}

#[test]
fn test_merge_patch_removes_nulls() {
    let mut object = json!({"spec": {"holderIdentity": "a", "leaseDurationSeconds": 15}});
    merge(&mut object, &json!({"spec": {"holderIdentity": null}}));
    assert_eq!(object, json!({"spec": {"leaseDurationSeconds": 15}}));
}

#[test]
fn test_parse_label_selector() {
    let selector = parse_label_selector("env!=prod,!legacy,tier=web,team");
    assert_eq!(selector.to_string(), "env!=prod,!legacy,tier=web,team");

    let labels = |pairs: &[(&str, &str)]| -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    };
    assert!(selector.matches(&labels(&[("env", "dev"), ("tier", "web"), ("team", "a")])));
    assert!(!selector.matches(&labels(&[("env", "prod"), ("tier", "web"), ("team", "a")])));
    assert!(!selector.matches(&labels(&[("tier", "web"), ("team", "a"), ("legacy", "1")])));
    assert_eq!(
        parse_label_selector("a==b"),
        Selector::from(Expression::Equal("a".to_string(), "b".to_string()))
    );
}
