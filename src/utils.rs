use faer::prelude::*;

/// Resize `mat` to `nrows` x `ncols`.
/// Contents are only kept when the shape is already right; callers overwrite every element.
pub(crate) fn resize_mat(mat: &mut Mat<f32>, nrows: usize, ncols: usize) {
    if mat.nrows() != nrows || mat.ncols() != ncols {
        *mat = Mat::zeros(nrows, ncols);
    }
}

/// Resize `dst` to the shape of `src` and copy it over.
pub(crate) fn copy_mat(dst: &mut Mat<f32>, src: MatRef<f32>) {
    resize_mat(dst, src.nrows(), src.ncols());
    for i in 0..src.nrows() {
        for j in 0..src.ncols() {
            dst[(i, j)] = src[(i, j)];
        }
    }
}

/// Copy `src` into the columns of `dst` starting at `col_offset`.
pub(crate) fn copy_into_cols(mut dst: MatMut<f32>, col_offset: usize, src: MatRef<f32>) {
    debug_assert!(dst.nrows() == src.nrows());
    debug_assert!(col_offset + src.ncols() <= dst.ncols());
    for i in 0..src.nrows() {
        for j in 0..src.ncols() {
            dst[(i, col_offset + j)] = src[(i, j)];
        }
    }
}

/// Row-major flatten, appended to `out`.
pub(crate) fn extend_row_major(out: &mut Vec<f32>, mat: MatRef<f32>) {
    out.reserve(mat.nrows() * mat.ncols());
    for i in 0..mat.nrows() {
        for j in 0..mat.ncols() {
            out.push(mat[(i, j)]);
        }
    }
}

pub(crate) fn extend_col(out: &mut Vec<f32>, col: ColRef<f32>) {
    out.extend((0..col.nrows()).map(|i| col[i]));
}

/// Inverse of `extend_row_major`, `values.len()` must equal `mat.nrows() * mat.ncols()`.
pub(crate) fn fill_row_major(mut mat: MatMut<f32>, values: &[f32]) {
    debug_assert!(values.len() == mat.nrows() * mat.ncols());
    let ncols = mat.ncols();
    for i in 0..mat.nrows() {
        for j in 0..ncols {
            mat[(i, j)] = values[i * ncols + j];
        }
    }
}

pub(crate) fn fill_col(mut col: ColMut<f32>, values: &[f32]) {
    debug_assert!(values.len() == col.nrows());
    for (i, &value) in values.iter().enumerate() {
        col[i] = value;
    }
}

/// `(offset, len)` of consecutive ranges of the given lengths.
pub(crate) fn ranges(lens: impl IntoIterator<Item = usize>) -> Vec<(usize, usize)> {
    let mut offset = 0usize;
    lens.into_iter()
        .map(|len| {
            let range = (offset, len);
            offset += len;
            range
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn row_major_round_trip() {
        let mat = Mat::from_fn(2, 3, |i, j| (i * 3 + j) as f32);
        let mut flat = Vec::new();
        extend_row_major(&mut flat, mat.as_ref());
        assert_eq!(flat, [0., 1., 2., 3., 4., 5.]);
        let mut back = Mat::<f32>::zeros(2, 3);
        fill_row_major(back.as_mut(), &flat);
        assert_eq!(back, mat);
    }

    #[test]
    fn ranges_are_consecutive() {
        assert_eq!(ranges([2, 0, 3]), [(0, 2), (2, 0), (2, 3)]);
    }
}
