use super::*;
use std::time::Duration;

fn table() -> Table<String, u32> {
    Table::new(HypervisorError::InstanceNotFound)
}

#[test]
fn test_put_get() {
    let t = table();
    t.put("a".to_string(), 1).unwrap();
    assert_eq!(t.get(&"a".to_string()).unwrap(), 1);
    assert_eq!(t.len(), 1);
}

#[test]
fn test_put_duplicate_fails() {
    let t = table();
    t.put("a".to_string(), 1).unwrap();
    assert!(matches!(
        t.put("a".to_string(), 2),
        Err(HypervisorError::AlreadyExists(_))
    ));
    assert_eq!(t.get(&"a".to_string()).unwrap(), 1);
}

#[test]
fn test_debug_reports_len() {
    let t = table();
    t.put("a".to_string(), 1).unwrap();
    t.put("b".to_string(), 2).unwrap();
    assert_eq!(format!("{:?}", t), "Table { len: 2 }");
}

#[test]
fn test_get_missing_uses_table_error() {
    let t = table();
    assert!(matches!(
        t.get(&"nope".to_string()),
        Err(HypervisorError::InstanceNotFound(id)) if id == "nope"
    ));
}

#[tokio::test]
async fn test_update_and_remove() {
    let t = table();
    let id = "a".to_string();
    t.put(id.clone(), 1).unwrap();

    let doubled = t.update(&id, |v| {
        *v *= 2;
        *v
    })
    .await
    .unwrap();
    assert_eq!(doubled, 2);
    assert_eq!(t.get(&id).unwrap(), 2);

    assert_eq!(t.remove(&id).await.unwrap(), 2);
    assert!(t.get(&id).is_err());
    assert!(t.remove(&id).await.unwrap_err().is_not_found());
}

#[tokio::test]
async fn test_unpublished_changes_are_invisible() {
    let t = table();
    let id = "a".to_string();
    t.put(id.clone(), 1).unwrap();

    let mut guard = t.lock(&id).await.unwrap();
    *guard.current_mut() = 7;
    assert_eq!(t.get(&id).unwrap(), 1);

    guard.publish();
    assert_eq!(t.get(&id).unwrap(), 7);
}

#[tokio::test]
async fn test_try_lock_reports_busy_with_published_state() {
    let t = table();
    let id = "a".to_string();
    t.put(id.clone(), 1).unwrap();

    let mut guard = t.lock(&id).await.unwrap();
    guard.apply(|v| *v = 5);

    match t.try_lock(&id).unwrap() {
        TryLock::Busy(state) => assert_eq!(state, 5),
        TryLock::Acquired(_) => panic!("record should be busy"),
    }

    drop(guard);
    assert!(matches!(t.try_lock(&id).unwrap(), TryLock::Acquired(_)));
}

#[tokio::test]
async fn test_waiter_sees_removal() {
    let t = Arc::new(table());
    let id = "a".to_string();
    t.put(id.clone(), 1).unwrap();

    let guard = t.lock(&id).await.unwrap();

    let waiter = {
        let t = t.clone();
        let id = id.clone();
        tokio::spawn(async move { t.lock(&id).await.map(|_| ()) })
    };
    tokio::time::sleep(Duration::from_millis(20)).await;

    t.remove_locked(guard);
    let result = waiter.await.unwrap();
    assert!(result.unwrap_err().is_not_found());
}

#[tokio::test]
async fn test_list_does_not_block_on_locked_records() {
    let t = table();
    for (i, name) in ["c", "a", "b"].iter().enumerate() {
        t.put(name.to_string(), i as u32).unwrap();
    }

    let _guard = t.lock(&"a".to_string()).await.unwrap();
    let listing = t.list(|_| true);
    let ids: Vec<_> = listing.ids().cloned().collect();
    assert_eq!(ids, vec!["a", "b", "c"]);
    assert_eq!(listing.iter().count(), 3);
}

#[tokio::test]
async fn test_list_is_lazy_and_restartable() {
    let t = table();
    let a = "a".to_string();
    let b = "b".to_string();
    t.put(a.clone(), 1).unwrap();
    t.put(b.clone(), 2).unwrap();

    let listing = t.list(|v| *v < 10);
    assert_eq!(listing.iter().collect::<Vec<_>>(), vec![1, 2]);

    // Writes after the listing was created show up on the next pass.
    t.update(&a, |v| *v = 3).await.unwrap();
    t.update(&b, |v| *v = 20).await.unwrap();
    assert_eq!(listing.iter().collect::<Vec<_>>(), vec![3]);

    // Removed records drop out.
    t.remove(&a).await.unwrap();
    assert!(listing.iter().next().is_none());

    // Records added later are not part of the captured set.
    t.put("c".to_string(), 4).unwrap();
    assert_eq!(listing.iter().count(), 0);
    assert_eq!(t.list(|_| true).iter().count(), 2);
}

#[test]
fn test_list_ids_keeps_request_order_and_skips_unknown() {
    let t = table();
    t.put("a".to_string(), 1).unwrap();
    t.put("b".to_string(), 2).unwrap();

    let ids = vec!["b".to_string(), "zz".to_string(), "a".to_string()];
    let listing = t.list_ids(&ids, |_| true);
    assert_eq!((&listing).into_iter().collect::<Vec<_>>(), vec![2, 1]);
}

#[tokio::test]
async fn test_concurrent_updates_are_atomic() {
    let t = Arc::new(table());
    let id = "counter".to_string();
    t.put(id.clone(), 0).unwrap();

    let tasks: Vec<_> = (0..50)
        .map(|_| {
            let t = t.clone();
            let id = id.clone();
            tokio::spawn(async move {
                t.update(&id, |v| *v += 1).await.unwrap();
            })
        })
        .collect();
    for task in tasks {
        task.await.unwrap();
    }

    assert_eq!(t.get(&id).unwrap(), 50);
}
