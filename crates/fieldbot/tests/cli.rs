use std::io::{BufRead, BufReader, Write};
use std::net::TcpListener;
use std::path::Path;
use std::thread;

use assert_cmd::Command;
use fieldbot::core::RgbImage;
use fieldbot::Homography;
use nalgebra::Point2;
use predicates::prelude::*;

fn write_robot_png(path: &Path) {
    let mut img = RgbImage::filled(640, 480, [40, 40, 40]);
    img.fill_disk(Point2::new(350.0, 240.0), 9.0, [255, 0, 180]);
    img.fill_disk(Point2::new(300.0, 240.0), 9.0, [100, 0, 200]);
    let png = image::RgbImage::from_raw(640, 480, img.data).expect("buffer");
    png.save(path).expect("save png");
}

fn fieldbot() -> Command {
    Command::cargo_bin("fieldbot").expect("binary")
}

#[test]
fn track_prints_pixel_pose() {
    let dir = tempfile::tempdir().expect("tempdir");
    let image = dir.path().join("frame.png");
    write_robot_png(&image);

    fieldbot()
        .args(["track", "--image"])
        .arg(&image)
        .assert()
        .success()
        .stdout(predicate::str::contains("\"pixel_pose\""))
        .stdout(predicate::str::contains("\"heading_deg\""))
        .stdout(predicate::str::contains("\"field_pose\": null"));
}

#[test]
fn track_maps_to_field_and_writes_overlay() {
    let dir = tempfile::tempdir().expect("tempdir");
    let image = dir.path().join("frame.png");
    write_robot_png(&image);
    let h_path = dir.path().join("h.json");
    Homography::identity().save(&h_path).expect("save");
    let overlay = dir.path().join("overlay.png");

    fieldbot()
        .args(["track", "--image"])
        .arg(&image)
        .arg("--homography")
        .arg(&h_path)
        .arg("--overlay")
        .arg(&overlay)
        .assert()
        .success()
        .stdout(predicate::str::contains("\"space\": \"field\""));
    assert!(overlay.exists());
}

#[test]
fn track_without_markers_reports_nulls() {
    let dir = tempfile::tempdir().expect("tempdir");
    let image = dir.path().join("empty.png");
    image::RgbImage::from_pixel(64, 48, image::Rgb([40, 40, 40]))
        .save(&image)
        .expect("save png");

    fieldbot()
        .args(["track", "--image"])
        .arg(&image)
        .assert()
        .success()
        .stdout(predicate::str::contains("\"pair\": null"));
}

#[test]
fn homography_subcommand_writes_calibration() {
    let dir = tempfile::tempdir().expect("tempdir");
    let out = dir.path().join("h.json");

    fieldbot()
        .args([
            "homography",
            "--corners",
            "100,50,1180,60,1200,700,80,690",
            "--out",
        ])
        .arg(&out)
        .assert()
        .success();

    let h = Homography::load(&out).expect("load");
    let br = h.apply(Point2::new(1200.0, 700.0));
    assert!((br.x - 1800.0).abs() < 1e-6 && (br.y - 1200.0).abs() < 1e-6);
}

#[test]
fn homography_rejects_degenerate_corners() {
    let dir = tempfile::tempdir().expect("tempdir");
    fieldbot()
        .args(["homography", "--corners", "0,0,10,0,20,0,30,0", "--out"])
        .arg(dir.path().join("h.json"))
        .assert()
        .failure();
}

#[test]
fn send_rejects_unknown_action() {
    fieldbot()
        .args(["send", "fly(3)"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("fly"));
}

#[test]
fn send_dispatches_token_over_tcp() {
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
    let port = listener.local_addr().expect("addr").port();
    let server = thread::spawn(move || {
        let (stream, _) = listener.accept().expect("accept");
        let mut line = String::new();
        BufReader::new(&stream).read_line(&mut line).expect("read");
        (&stream).write_all(b"turned").expect("write");
        line
    });

    fieldbot()
        .args(["send", "turn_left_deg(15)", "--port", &port.to_string()])
        .assert()
        .success()
        .stdout(predicate::str::contains("ok: turned"));
    assert_eq!(server.join().expect("server"), "turn_left_deg(15)\n");
}
