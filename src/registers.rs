//! The target register model.
//!
//! A target description is a [RegisterFile]: a set of register classes, each
//! holding an ordered list of registers.  Registers are identified by their
//! class and their index within it; a `global_index` spanning all classes is
//! derived for masks that cover the whole file, such as the per-function
//! allocatable set.

use std::fmt;

use fixedbitset::FixedBitSet;

/// A register class handle.  Indexes into the owning [RegisterFile].
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, PartialOrd, Ord)]
pub struct RegClass(pub usize);

/// A single target register: its class and its index within that class.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub struct Register {
    pub class: RegClass,
    pub index: usize,
}

struct RegisterInfo {
    name: String,
    is_virtual: bool,
}

struct RegisterClassInfo {
    name: String,
    registers: Vec<RegisterInfo>,
    first_global: usize,
}

/// All register classes of the target.
pub struct RegisterFile {
    classes: Vec<RegisterClassInfo>,
    n_global: usize,
}

impl RegisterFile {
    pub fn new() -> RegisterFile {
        RegisterFile {
            classes: Vec::new(),
            n_global: 0,
        }
    }

    /// Adds a class with the given register names and returns its handle.
    pub fn add_class(&mut self, name: &str, register_names: &[&str]) -> RegClass {
        let class = RegClass(self.classes.len());
        self.classes.push(RegisterClassInfo {
            name: name.to_owned(),
            registers: register_names
                .iter()
                .map(|reg_name| RegisterInfo {
                    name: (*reg_name).to_owned(),
                    is_virtual: false,
                })
                .collect(),
            first_global: self.n_global,
        });
        self.n_global += register_names.len();
        class
    }

    /// Appends a virtual register to an existing class.  Virtual registers
    /// take part in assignments but are invisible to the in-use scans.
    pub fn add_virtual(&mut self, class: RegClass, name: &str) -> Register {
        // Keep global indices dense: a virtual register can only be appended
        // to the most recently added class.
        assert!(
            class.0 == self.classes.len() - 1,
            "virtual registers must be added to the newest class"
        );
        let class_info = &mut self.classes[class.0];
        let index = class_info.registers.len();
        class_info.registers.push(RegisterInfo {
            name: name.to_owned(),
            is_virtual: true,
        });
        self.n_global += 1;
        Register { class, index }
    }

    pub fn n_classes(&self) -> usize {
        self.classes.len()
    }

    pub fn n_regs(&self, class: RegClass) -> usize {
        self.classes[class.0].registers.len()
    }

    pub fn n_global(&self) -> usize {
        self.n_global
    }

    pub fn register(&self, class: RegClass, index: usize) -> Register {
        assert!(index < self.n_regs(class));
        Register { class, index }
    }

    pub fn global_index(&self, reg: Register) -> usize {
        self.classes[reg.class.0].first_global + reg.index
    }

    pub fn name(&self, reg: Register) -> &str {
        &self.classes[reg.class.0].registers[reg.index].name
    }

    pub fn class_name(&self, class: RegClass) -> &str {
        &self.classes[class.0].name
    }

    pub fn is_virtual(&self, reg: Register) -> bool {
        self.classes[reg.class.0].registers[reg.index].is_virtual
    }

    /// A mask over global indices with every register of the file set.
    pub fn full_mask(&self) -> FixedBitSet {
        let mut mask = FixedBitSet::with_capacity(self.n_global);
        mask.insert_range(..);
        mask
    }
}

impl Default for RegisterFile {
    fn default() -> Self {
        RegisterFile::new()
    }
}

impl fmt::Display for Register {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.class.0, self.index)
    }
}

/// The register requirement attached to a value-producing node.
///
/// `other_different` and `other_same` are bitmasks over the node's own
/// inputs; a set bit at position `i` relates the node's result register to
/// the register of input `i`.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RegRequirement {
    pub class: Option<RegClass>,
    /// The node's register is pinned and not a candidate for rewriting.
    pub ignore: bool,
    /// Result register must differ from the registers of these inputs.
    pub other_different: u32,
    /// Result register should equal the register of one of these inputs.
    pub other_same: u32,
    /// Result register is restricted to this subset of its class.
    pub limited: Option<FixedBitSet>,
}

impl RegRequirement {
    pub fn normal(class: RegClass) -> RegRequirement {
        RegRequirement {
            class: Some(class),
            ..Default::default()
        }
    }

    /// True when no constraint besides the class is in force.
    pub fn is_normal(&self) -> bool {
        !self.ignore
            && self.other_different == 0
            && self.other_same == 0
            && self.limited.is_none()
    }

    pub fn must_be_different(&self) -> bool {
        self.other_different != 0
    }

    pub fn should_be_same(&self) -> bool {
        self.other_same != 0
    }
}
