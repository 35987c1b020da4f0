use crate::fits_io::write_image;
use ndarray::Array2;
use std::path::Path;

/// Write a FITS image, optionally tagged with `(OBJECT, DATE)`
pub(crate) fn write_fixture(path: &Path, image: &Array2<f64>, identity: Option<(&str, &str)>) {
    let (mut fptr, hdu) = write_image(path, image).unwrap();
    if let Some((object, date)) = identity {
        hdu.write_key(&mut fptr, "OBJECT", object).unwrap();
        hdu.write_key(&mut fptr, "DATE", date).unwrap();
    }
}
