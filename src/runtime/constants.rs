//! Class constant table.

use crate::runtime::class::Const;
use crate::runtime::error::LinkError;
use crate::runtime::linker::ClassBuilder;

impl ClassBuilder<'_> {
    /// Parent constants first, then interface constants, then own
    /// declarations. Interface constants can neither collide with one another
    /// nor be overridden.
    pub(crate) fn set_constants(&mut self) -> Result<(), LinkError> {
        if let Some(parent) = &self.parent {
            for c in parent.constants() {
                self.constants.insert(c.name, c.clone());
            }
        }

        for iface in self.interfaces.values() {
            for c in iface.constants() {
                match self.constants.get(&c.name) {
                    Some(existing) if existing.class.id != c.class.id => {
                        return Err(LinkError::ConstantConflict {
                            class: self.me.name,
                            constant: c.name,
                            message: format!("Cannot inherit previously-inherited constant {}", c.name),
                        });
                    }
                    Some(_) => {}
                    None => {
                        self.constants.insert(c.name, c.clone());
                    }
                }
            }
        }

        let decl = self.decl;
        for pre in &decl.constants {
            if let Some(existing) = self.constants.get(&pre.name) {
                if existing.class_is_interface {
                    return Err(LinkError::ConstantConflict {
                        class: self.name(),
                        constant: pre.name,
                        message: format!(
                            "Cannot override previously defined constant {}::{} in {}",
                            existing.class.name,
                            pre.name,
                            self.name()
                        ),
                    });
                }
            }
            self.constants.insert(
                pre.name,
                Const {
                    name: pre.name,
                    class: self.me,
                    class_is_interface: decl.is_interface(),
                    val: pre.value.clone(),
                    php_code: pre.php_code.clone(),
                },
            );
        }
        Ok(())
    }
}
