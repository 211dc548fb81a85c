use std::fs;
use std::path::{Path, PathBuf};

use avis_loader::config::Config;
use avis_loader::events::Event;
use avis_loader::image::{self as img, DecodeOptions, ImageRsCodec};
use avis_loader::manipulator::Manipulator;
use avis_loader::navigator::Navigator;
use avis_loader::orientation::Orientation;
use avis_loader::Error;
use image::{DynamicImage, ImageFormat, Rgba, RgbaImage};
use tempfile::{tempdir, TempDir};

fn gradient(w: u32, h: u32) -> DynamicImage {
    DynamicImage::ImageRgba8(RgbaImage::from_fn(w, h, |x, y| {
        Rgba([(x * 30) as u8, (y * 40) as u8, ((x + y) * 10) as u8, 255])
    }))
}

fn folder_with_png(name: &str) -> (TempDir, PathBuf) {
    let temp = tempdir().expect("failed to create temp dir");
    let path = temp.path().join(name);
    gradient(6, 4)
        .save_with_format(&path, ImageFormat::Png)
        .expect("failed to write png");
    (temp, path)
}

fn navigator() -> Navigator {
    let mut config = Config::default();
    config.watch.enabled = false;
    Navigator::new(config)
}

fn decode(path: &Path) -> DynamicImage {
    let loaded = img::load(path, DecodeOptions::default(), &ImageRsCodec).expect("decode failed");
    loaded.pixels.as_ref().clone()
}

#[test]
fn lossless_save_then_load_is_pixel_identical() {
    let (temp, path) = folder_with_png("a.png");
    let mut nav = navigator();
    nav.load_file(&path).expect("load failed");

    let entry = nav
        .apply_manipulator(&Manipulator::Invert)
        .expect("invert failed");
    let staged = entry.image().expect("edited pixels");
    assert!(nav.is_edited());

    let target = temp.path().join("out.png");
    nav.save(&entry, &target, "png", Some(90)).expect("save failed");

    assert_eq!(decode(&target).to_rgba8(), staged.to_rgba8());
    assert!(!entry.is_dirty());
}

#[test]
fn save_current_overwrites_and_clears_the_edit() {
    let (_temp, path) = folder_with_png("a.png");
    let mut nav = navigator();
    let events = nav.subscribe();
    nav.load_file(&path).expect("load failed");

    nav.apply_manipulator(&Manipulator::FlipH).expect("flip failed");
    let saved_to = nav.save_current().expect("save failed");

    assert_eq!(saved_to.file_name(), path.file_name());
    assert!(!nav.is_edited());
    assert_eq!(decode(&path).to_rgba8(), gradient(6, 4).fliph().to_rgba8());
    assert!(events
        .try_iter()
        .any(|e| matches!(e, Event::ImageSaved { .. })));
}

#[test]
fn unsupported_format_is_rejected() {
    let (temp, path) = folder_with_png("a.png");
    let mut nav = navigator();
    let entry = nav
        .load_file(&path)
        .expect("load failed")
        .expect("a.png exists");

    let err = nav
        .save(&entry, &temp.path().join("a.psd"), "psd", None)
        .unwrap_err();
    assert!(matches!(err, Error::UnsupportedFormat(_)));
}

#[test]
fn second_save_of_the_same_entry_is_rejected() {
    let (temp, path) = folder_with_png("a.png");
    let mut nav = navigator();
    let entry = nav
        .load_file(&path)
        .expect("load failed")
        .expect("a.png exists");

    let guard = entry.begin_save().expect("no save running yet");
    let err = nav
        .save(&entry, &temp.path().join("b.png"), "png", None)
        .unwrap_err();
    assert!(matches!(err, Error::SaveInProgress(_)));

    drop(guard);
    nav.save(&entry, &temp.path().join("b.png"), "png", None)
        .expect("save failed");
}

#[test]
fn write_failure_keeps_the_entry_dirty() {
    let (temp, path) = folder_with_png("a.png");
    let mut nav = navigator();
    nav.load_file(&path).expect("load failed");
    let entry = nav
        .apply_manipulator(&Manipulator::Grayscale)
        .expect("grayscale failed");

    let err = nav
        .save(&entry, &temp.path().join("missing").join("a.png"), "png", None)
        .unwrap_err();

    assert!(matches!(err, Error::Write { .. }));
    assert!(entry.is_dirty());
    assert!(!entry.is_saving());
}

#[test]
fn async_save_reports_when_done() {
    let (temp, path) = folder_with_png("a.png");
    let mut nav = navigator();
    let entry = nav
        .load_file(&path)
        .expect("load failed")
        .expect("a.png exists");

    let target = temp.path().join("copy.jpg");
    let handle = nav
        .save_async(&entry, &target, "jpg", Some(5))
        .expect("save should start");
    assert_eq!(handle.path(), target.as_path());

    handle.wait().expect("save failed");
    assert!(!entry.is_saving());
    assert_eq!(decode(&target).to_rgb8().dimensions(), (6, 4));
}

#[test]
fn pasted_image_is_saved_into_the_save_folder() {
    let (temp, path) = folder_with_png("a.png");
    let save_dir = temp.path().join("exports");
    fs::create_dir(&save_dir).expect("failed to create folder");

    let mut nav = navigator();
    nav.load_file(&path).expect("load failed");
    nav.set_save_dir(&save_dir).expect("save dir exists");

    let entry = nav.set_image(gradient(3, 3), "pasted.png");
    assert!(entry.is_transient());
    assert!(nav.is_edited());
    assert_eq!(nav.current_index(), None);

    let saved_to = nav.save_current().expect("save failed");
    assert_eq!(saved_to.parent(), Some(nav.save_dir().expect("save dir set")));
    assert_eq!(decode(&saved_to).to_rgba8(), gradient(3, 3).to_rgba8());
    assert!(!nav.is_edited());
}

#[test]
fn deleting_a_pasted_image_goes_back_to_the_folder() {
    let (_temp, path) = folder_with_png("a.png");
    let mut nav = navigator();
    nav.load_file(&path).expect("load failed");

    let pasted = nav.set_image(gradient(2, 2), "never_saved.png");
    nav.delete(&pasted).expect("nothing on disk to delete");

    assert_eq!(nav.current().map(|e| e.name().to_string()).as_deref(), Some("a.png"));
    assert!(path.exists());
}

#[test]
fn failed_manipulation_leaves_the_image_alone() {
    let (_temp, path) = folder_with_png("full_range.png");
    let mut full_range = RgbaImage::from_pixel(2, 1, Rgba([0, 0, 0, 255]));
    full_range.put_pixel(1, 0, Rgba([255, 255, 255, 255]));
    DynamicImage::ImageRgba8(full_range)
        .save_with_format(&path, ImageFormat::Png)
        .expect("failed to write png");

    let mut nav = navigator();
    let entry = nav
        .load_file(&path)
        .expect("load failed")
        .expect("full_range.png exists");

    let err = nav.apply_manipulator(&Manipulator::Normalize).unwrap_err();
    assert!(matches!(err, Error::Manipulation(_)));
    assert!(!entry.is_dirty());
    assert!(entry.edited_image().is_none());
}

#[test]
fn edits_on_a_downscaled_preview_save_at_full_size() {
    let temp = tempdir().expect("failed to create temp dir");
    let path = temp.path().join("big.png");
    gradient(16, 16)
        .save_with_format(&path, ImageFormat::Png)
        .expect("failed to write png");

    let mut config = Config::default();
    config.watch.enabled = false;
    config.decode.max_dimension = Some(4);
    let mut nav = Navigator::new(config);

    let entry = nav
        .load_file(&path)
        .expect("load failed")
        .expect("big.png exists");
    entry.wait_loaded();
    let preview = entry.image().expect("preview decoded");
    assert!(preview.width() <= 4 && preview.height() <= 4);

    nav.apply_manipulator(&Manipulator::Invert).expect("invert failed");
    assert_eq!(entry.image().map(|i| (i.width(), i.height())), Some((16, 16)));

    nav.save_current().expect("save failed");

    let mut inverted = gradient(16, 16);
    inverted.invert();
    assert_eq!(decode(&path).to_rgba8(), inverted.to_rgba8());
}

#[test]
fn orientation_can_be_set_and_undone() {
    let (_temp, path) = folder_with_png("a.png");
    let mut nav = navigator();
    nav.load_file(&path).expect("load failed");

    let entry = nav
        .set_orientation(Orientation::Rotate90CW)
        .expect("orienting failed");
    let turned = entry.image().expect("staged pixels");
    assert_eq!((turned.width(), turned.height()), (4, 6));
    assert_eq!(turned.to_rgba8(), gradient(6, 4).rotate90().to_rgba8());
    assert!(nav.is_edited());

    //going through the raw orientation and back changes nothing
    nav.set_orientation(Orientation::Normal)
        .expect("orienting failed");
    assert_eq!(
        entry.image().expect("staged pixels").to_rgba8(),
        gradient(6, 4).to_rgba8()
    );

    nav.set_orientation(Orientation::Rotate90CW)
        .expect("orienting failed");
    assert_eq!(
        entry.image().expect("staged pixels").to_rgba8(),
        turned.to_rgba8()
    );
}

#[test]
fn orientation_keeps_earlier_edits() {
    let (_temp, path) = folder_with_png("a.png");
    let mut nav = navigator();
    nav.load_file(&path).expect("load failed");

    nav.apply_manipulator(&Manipulator::Invert).expect("invert failed");
    let entry = nav
        .set_orientation(Orientation::Rotate180)
        .expect("orienting failed");

    let mut expected = gradient(6, 4);
    expected.invert();
    assert_eq!(
        entry.image().expect("staged pixels").to_rgba8(),
        expected.rotate180().to_rgba8()
    );
    assert_eq!(entry.edited_orientation(), Some(Orientation::Rotate180));

    entry.discard_edits();
    assert_eq!(entry.edited_orientation(), None);
}
