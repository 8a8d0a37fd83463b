use axum::{
    body::Body,
    http::{header, Method, Request, StatusCode},
    Router,
};
use http_body_util::BodyExt;
use libvirt_aws_core::{
    hypervisor::MockBackend,
    store::{StateStore, TagDatabase},
    translator::{Translator, TranslatorSettings},
};
use libvirt_aws_daemon::{router, AuthConfig, DaemonState};
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceExt;

fn app_with(auth: AuthConfig) -> Router {
    app_on(Arc::new(MockBackend::new()), auth)
}

fn app_on(backend: Arc<MockBackend>, auth: AuthConfig) -> Router {
    let translator = Translator::new(
        backend,
        Arc::new(StateStore::new()),
        TagDatabase::in_memory().unwrap(),
        TranslatorSettings::default(),
    );
    router(Arc::new(DaemonState::new(translator, auth)), Duration::from_secs(10))
}

fn app() -> Router {
    app_with(AuthConfig::default())
}

async fn post(app: &Router, form: &str) -> (StatusCode, String) {
    let request = Request::builder()
        .method(Method::POST)
        .uri("/")
        .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
        .body(Body::from(form.to_string()))
        .unwrap();
    send(app, request).await
}

async fn send(app: &Router, request: Request<Body>) -> (StatusCode, String) {
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    (status, String::from_utf8(bytes.to_vec()).unwrap())
}

/// Text of the first `<name>` element.
fn element<'a>(xml: &'a str, name: &str) -> Option<&'a str> {
    let open = format!("<{}>", name);
    let close = format!("</{}>", name);
    let start = xml.find(&open)? + open.len();
    let end = start + xml[start..].find(&close)?;
    Some(&xml[start..end])
}

async fn run_instance(app: &Router) -> String {
    let (status, body) = post(
        app,
        "Action=RunInstances&ImageId=ubuntu.qcow2&InstanceType=t3.medium&MinCount=1&MaxCount=1",
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{}", body);
    element(&body, "instanceId").unwrap().to_string()
}

#[tokio::test]
async fn test_run_instances_envelope() {
    let app = app();
    let (status, body) = post(
        &app,
        "Action=RunInstances&Version=2016-11-15&ImageId=ubuntu.qcow2&InstanceType=t3.medium",
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert!(body.starts_with("<?xml"));
    assert!(body.contains(r#"<RunInstancesResponse xmlns="http://ec2.amazonaws.com/doc/2016-11-15/">"#));
    assert!(element(&body, "requestId").is_some());
    assert!(element(&body, "reservationId").unwrap().starts_with("r-"));
    assert!(body.contains("<instancesSet><item>"));
    assert_eq!(element(&body, "coreCount"), Some("2"));
    assert_eq!(element(&body, "memoryMiB"), Some("4096"));
    assert!(body.contains("<name>running</name>"));
}

#[tokio::test]
async fn test_get_with_query_string() {
    let app = app();
    let request = Request::builder()
        .method(Method::GET)
        .uri("/?Action=DescribeAvailabilityZones")
        .body(Body::empty())
        .unwrap();
    let (status, body) = send(&app, request).await;

    assert_eq!(status, StatusCode::OK);
    assert!(body.contains("<DescribeAvailabilityZonesResponse"));
    assert!(body.contains("<zoneName>us-east-2a</zoneName>"));
    assert!(body.contains("<zoneName>us-east-2c</zoneName>"));
}

#[tokio::test]
async fn test_missing_and_unknown_action() {
    let app = app();

    let (status, body) = post(&app, "ImageId=x").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(element(&body, "Code"), Some("MissingAction"));

    let (status, body) = post(&app, "Action=CreateSnapshot").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(element(&body, "Code"), Some("InvalidAction"));
    assert!(element(&body, "RequestID").is_some());
}

#[tokio::test]
async fn test_missing_parameter() {
    let (status, body) = post(&app(), "Action=RunInstances").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(element(&body, "Code"), Some("MissingParameter"));
    assert!(element(&body, "Message").unwrap().contains("ImageId"));
}

#[tokio::test]
async fn test_unknown_instance() {
    let (status, body) = post(&app(), "Action=TerminateInstances&InstanceId.1=i-doesnotexist").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(element(&body, "Code"), Some("InvalidInstanceID.NotFound"));
}

#[tokio::test]
async fn test_instance_lifecycle() {
    let app = app();
    let id = run_instance(&app).await;

    let (status, body) = post(&app, &format!("Action=StartInstances&InstanceId.1={}", id)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(element(&body, "Code"), Some("IncorrectInstanceState"));

    let (status, body) = post(&app, &format!("Action=StopInstances&InstanceId.1={}", id)).await;
    assert_eq!(status, StatusCode::OK);
    assert!(body.contains("<currentState><code>80</code><name>stopped</name></currentState>"));

    let (status, body) = post(&app, &format!("Action=TerminateInstances&InstanceId.1={}", id)).await;
    assert_eq!(status, StatusCode::OK);
    assert!(body.contains("<previousState><code>80</code><name>stopped</name></previousState>"));

    let (status, body) = post(
        &app,
        "Action=DescribeInstances&Filter.1.Name=instance-state-name&Filter.1.Value.1=terminated",
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(element(&body, "instanceId"), Some(id.as_str()));
}

#[tokio::test]
async fn test_describe_images() {
    let backend = Arc::new(MockBackend::new());
    backend.add_image("default", "ubuntu.qcow2", 8).unwrap();
    let app = app_on(backend, AuthConfig::default());

    let (status, body) = post(&app, "Action=DescribeImages").await;
    assert_eq!(status, StatusCode::OK, "{}", body);
    assert!(body.contains("<DescribeImagesResponse"));
    assert!(body.contains("<imagesSet><item><imageId>ubuntu.qcow2</imageId>"));
    assert_eq!(element(&body, "imageState"), Some("available"));
    assert_eq!(element(&body, "rootDeviceName"), Some("/dev/vda"));

    let (status, body) = post(&app, "Action=DescribeImages&ImageId.1=ghost.qcow2").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(element(&body, "Code"), Some("InvalidAMIID.NotFound"));
}

#[tokio::test]
async fn test_user_data_and_network_interfaces() {
    let app = app();
    let (status, body) = post(
        &app,
        "Action=RunInstances&ImageId=ubuntu.qcow2&UserData=I2Nsb3VkLWNvbmZpZwo%3D",
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{}", body);
    assert!(body.contains("<networkInterfaceSet><item><networkInterfaceId>eni-"));

    let (status, body) = post(&app, "Action=DescribeInstances").await;
    assert_eq!(status, StatusCode::OK);
    let ip = element(&body, "privateIpAddress").unwrap();
    assert!(ip.starts_with("192.168."));
    assert_eq!(element(&body, "deviceIndex"), Some("0"));

    let (status, body) = post(&app, "Action=RunInstances&ImageId=ubuntu.qcow2&UserData=%25%25").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(element(&body, "Code"), Some("InvalidParameterValue"));
}

#[tokio::test]
async fn test_volume_flow() {
    let app = app();
    let instance = run_instance(&app).await;

    let (status, body) = post(&app, "Action=CreateVolume&Size=8&AvailabilityZone=us-east-2a").await;
    assert_eq!(status, StatusCode::OK, "{}", body);
    assert!(body.contains("<CreateVolumeResponse"));
    assert_eq!(element(&body, "status"), Some("available"));
    let volume = element(&body, "volumeId").unwrap().to_string();

    let (status, body) = post(
        &app,
        &format!(
            "Action=AttachVolume&VolumeId={}&InstanceId={}&Device=%2Fdev%2Fsdf",
            volume, instance
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{}", body);
    assert_eq!(element(&body, "status"), Some("attaching"));
    assert_eq!(element(&body, "device"), Some("/dev/sdf"));

    let (status, body) = post(&app, &format!("Action=DeleteVolume&VolumeId={}", volume)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(element(&body, "Code"), Some("VolumeInUse"));

    let (status, body) = post(
        &app,
        &format!("Action=AttachVolume&VolumeId={}&InstanceId={}&Device=sdg", volume, instance),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(element(&body, "Code"), Some("IncorrectState"));

    let (status, body) = post(&app, &format!("Action=DetachVolume&VolumeId={}", volume)).await;
    assert_eq!(status, StatusCode::OK, "{}", body);
    assert_eq!(element(&body, "status"), Some("detaching"));

    let (status, body) = post(&app, &format!("Action=DeleteVolume&VolumeId={}", volume)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(element(&body, "return"), Some("true"));

    let (status, body) = post(&app, &format!("Action=DescribeVolumes&VolumeId.1={}", volume)).await;
    assert_eq!(status, StatusCode::OK);
    assert!(!body.contains("<item>"));
}

#[tokio::test]
async fn test_tags() {
    let app = app();
    let instance = run_instance(&app).await;

    let (status, _) = post(
        &app,
        &format!("Action=CreateTags&ResourceId.1={}&Tag.1.Key=Name&Tag.1.Value=web", instance),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = post(&app, "Action=DescribeTags&Filter.1.Name=key&Filter.1.Value.1=Name").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(element(&body, "resourceId"), Some(instance.as_str()));
    assert_eq!(element(&body, "resourceType"), Some("instance"));
    assert_eq!(element(&body, "value"), Some("web"));
}

#[tokio::test]
async fn test_auth_rejects_unknown_key() {
    let app = app_with(AuthConfig {
        enabled: true,
        access_keys: vec!["AKIDEXAMPLE".to_string()],
    });

    let (status, body) = post(&app, "Action=DescribeInstances").await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(element(&body, "Code"), Some("AuthFailure"));

    let request = Request::builder()
        .method(Method::POST)
        .uri("/")
        .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
        .header(
            header::AUTHORIZATION,
            "AWS4-HMAC-SHA256 Credential=AKIDEXAMPLE/20240501/us-east-2/ec2/aws4_request, SignedHeaders=host, Signature=0",
        )
        .body(Body::from("Action=DescribeInstances"))
        .unwrap();
    let (status, body) = send(&app, request).await;
    assert_eq!(status, StatusCode::OK, "{}", body);
    assert!(body.contains("<reservationSet"));
}
