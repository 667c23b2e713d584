pub mod bins;
pub mod lock;
pub mod process;

pub mod path {
    /// Last component of an image path in either separator convention.
    /// Hyper-V reports backslash paths, XenServer forward-slash ones.
    #[inline]
    pub fn image_leaf(s: &str) -> &str {
        s.rsplit(['/', '\\']).next().unwrap_or(s)
    }

    #[inline]
    pub fn image_dir(s: &str) -> &str {
        match s.rfind(['/', '\\']) {
            Some(i) => &s[..i],
            None => "",
        }
    }

    #[cfg(test)]
    mod tests {
        use super::*;

        #[test]
        fn leaf_unix() {
            assert_eq!(image_leaf("/run/sr-mount/sr1/disk.vhd"), "disk.vhd");
        }

        #[test]
        fn leaf_windows() {
            assert_eq!(image_leaf(r"C:\disks\snap.avhdx"), "snap.avhdx");
        }

        #[test]
        fn leaf_bare() {
            assert_eq!(image_leaf("disk.vhd"), "disk.vhd");
        }

        #[test]
        fn dir_unix() {
            assert_eq!(image_dir("/run/sr-mount/sr1/disk.vhd"), "/run/sr-mount/sr1");
        }

        #[test]
        fn dir_windows() {
            assert_eq!(image_dir(r"C:\disks\snap.avhdx"), r"C:\disks");
        }

        #[test]
        fn dir_bare() {
            assert_eq!(image_dir("disk.vhd"), "");
        }
    }
}
