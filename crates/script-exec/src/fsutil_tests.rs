use super::*;

#[test]
fn write_then_read_round_trips() {
    let dir = temp_dir("script-exec-test").unwrap();
    let path = dir.path().join("greeting.txt");
    write(&path, "hello").unwrap();
    assert_eq!(read_to_string(&path).unwrap(), "hello");
}

#[test]
fn read_missing_file_is_an_io_error() {
    let dir = temp_dir("script-exec-test").unwrap();
    let missing = dir.path().join("nope.txt");
    let err = read(&missing).unwrap_err();
    assert!(matches!(err, FsError::Io { .. }));
}

#[test]
fn list_dir_returns_sorted_children() {
    let dir = temp_dir("script-exec-test").unwrap();
    write(dir.path().join("b.txt"), "b").unwrap();
    write(dir.path().join("a.txt"), "a").unwrap();
    let entries = list_dir(dir.path()).unwrap();
    let names: Vec<_> = entries
        .iter()
        .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
        .collect();
    assert_eq!(names, vec!["a.txt".to_string(), "b.txt".to_string()]);
}

#[test]
fn temp_file_is_writable() {
    let mut file = temp_file("script-exec-test").unwrap();
    use std::io::Write;
    write!(file, "payload").unwrap();
    assert_eq!(read_to_string(file.path()).unwrap(), "payload");
}
