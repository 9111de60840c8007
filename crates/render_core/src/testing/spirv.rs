//! Minimal SPIR-V assembler for reflection fixtures
//!
//! Emits a valid module with one entry point, an empty `main` and the
//! requested resource declarations. Only the instructions the reflector
//! looks at are supported.

const MAGIC: u32 = 0x0723_0203;
const VERSION_1_0: u32 = 0x0001_0000;

mod op {
    pub const NAME: u16 = 5;
    pub const MEMORY_MODEL: u16 = 14;
    pub const ENTRY_POINT: u16 = 15;
    pub const EXECUTION_MODE: u16 = 16;
    pub const CAPABILITY: u16 = 17;
    pub const TYPE_VOID: u16 = 19;
    pub const TYPE_INT: u16 = 21;
    pub const TYPE_FLOAT: u16 = 22;
    pub const TYPE_VECTOR: u16 = 23;
    pub const TYPE_MATRIX: u16 = 24;
    pub const TYPE_IMAGE: u16 = 25;
    pub const TYPE_SAMPLED_IMAGE: u16 = 27;
    pub const TYPE_ARRAY: u16 = 28;
    pub const TYPE_STRUCT: u16 = 30;
    pub const TYPE_POINTER: u16 = 32;
    pub const TYPE_FUNCTION: u16 = 33;
    pub const CONSTANT: u16 = 43;
    pub const FUNCTION: u16 = 54;
    pub const FUNCTION_END: u16 = 56;
    pub const VARIABLE: u16 = 59;
    pub const DECORATE: u16 = 71;
    pub const MEMBER_DECORATE: u16 = 72;
    pub const LABEL: u16 = 248;
    pub const RETURN: u16 = 253;
}

mod decoration {
    pub const BLOCK: u32 = 2;
    pub const COL_MAJOR: u32 = 5;
    pub const ARRAY_STRIDE: u32 = 6;
    pub const MATRIX_STRIDE: u32 = 7;
    pub const BINDING: u32 = 33;
    pub const DESCRIPTOR_SET: u32 = 34;
    pub const OFFSET: u32 = 35;
}

mod storage {
    pub const UNIFORM_CONSTANT: u32 = 0;
    pub const UNIFORM: u32 = 2;
    pub const PUSH_CONSTANT: u32 = 9;
}

const ID_VOID: u32 = 1;
const ID_FN_TYPE: u32 = 2;
const ID_MAIN: u32 = 3;
const ID_FLOAT: u32 = 4;
const ID_VEC4: u32 = 5;
const ID_MAT4: u32 = 6;
const ID_UINT: u32 = 7;
const FIRST_FREE_ID: u32 = 8;

/// Shader stage of the fixture
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Vertex,
    Fragment,
}

/// Block member type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Member {
    Float,
    Vec4,
    Mat4,
    FloatArray { len: u32, stride: u32 },
}

impl Member {
    fn size(self) -> u32 {
        match self {
            Self::Float => 4,
            Self::Vec4 => 16,
            Self::Mat4 => 64,
            Self::FloatArray { len, stride } => len * stride,
        }
    }
}

/// Resource declaration
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resource {
    Uniform { set: u32, binding: u32, members: Vec<(u32, Member)> },
    Texture { set: u32, binding: u32 },
    SeparateImage { set: u32, binding: u32 },
    Push { members: Vec<(u32, Member)> },
}

impl Resource {
    /// Uniform block with tightly packed members
    pub fn uniform(set: u32, binding: u32, members: Vec<Member>) -> Self {
        let mut offset = 0;
        let members = members
            .into_iter()
            .map(|member| {
                let placed = (offset, member);
                offset += member.size();
                placed
            })
            .collect();
        Self::Uniform { set, binding, members }
    }

    /// Uniform block with explicit member offsets
    pub fn uniform_at(set: u32, binding: u32, members: Vec<(u32, Member)>) -> Self {
        Self::Uniform { set, binding, members }
    }

    /// `sampler2D`
    pub fn texture(set: u32, binding: u32) -> Self {
        Self::Texture { set, binding }
    }

    /// `texture2D` without a sampler
    pub fn separate_image(set: u32, binding: u32) -> Self {
        Self::SeparateImage { set, binding }
    }

    /// Push constant block with explicit member offsets
    pub fn push(members: Vec<(u32, Member)>) -> Self {
        Self::Push { members }
    }
}

#[derive(Default)]
struct Assembler {
    next_id: u32,
    names: Vec<u32>,
    annotations: Vec<u32>,
    globals: Vec<u32>,
    image: Option<u32>,
    sampled_image_pointer: Option<u32>,
    image_pointer: Option<u32>,
}

fn emit(out: &mut Vec<u32>, opcode: u16, operands: &[u32]) {
    out.push(((operands.len() as u32 + 1) << 16) | u32::from(opcode));
    out.extend_from_slice(operands);
}

fn string_words(text: &str) -> Vec<u32> {
    let mut bytes = text.as_bytes().to_vec();
    bytes.push(0);
    while bytes.len() % 4 != 0 {
        bytes.push(0);
    }
    bytes
        .chunks_exact(4)
        .map(|chunk| u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect()
}

impl Assembler {
    fn id(&mut self) -> u32 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    fn name(&mut self, target: u32, name: &str) {
        let mut operands = vec![target];
        operands.extend(string_words(name));
        emit(&mut self.names, op::NAME, &operands);
    }

    fn decorate(&mut self, target: u32, operands: &[u32]) {
        let mut all = vec![target];
        all.extend_from_slice(operands);
        emit(&mut self.annotations, op::DECORATE, &all);
    }

    fn member_type(&mut self, member: Member) -> u32 {
        match member {
            Member::Float => ID_FLOAT,
            Member::Vec4 => ID_VEC4,
            Member::Mat4 => ID_MAT4,
            Member::FloatArray { len, stride } => {
                let length = self.id();
                emit(&mut self.globals, op::CONSTANT, &[ID_UINT, length, len]);
                let array = self.id();
                emit(&mut self.globals, op::TYPE_ARRAY, &[array, ID_FLOAT, length]);
                self.decorate(array, &[decoration::ARRAY_STRIDE, stride]);
                array
            }
        }
    }

    fn block(&mut self, members: &[(u32, Member)]) -> u32 {
        let member_types: Vec<u32> = members.iter().map(|(_, member)| self.member_type(*member)).collect();
        let block = self.id();
        let mut operands = vec![block];
        operands.extend(&member_types);
        emit(&mut self.globals, op::TYPE_STRUCT, &operands);
        self.decorate(block, &[decoration::BLOCK]);
        for (index, (offset, member)) in members.iter().enumerate() {
            let index = index as u32;
            emit(&mut self.annotations, op::MEMBER_DECORATE, &[block, index, decoration::OFFSET, *offset]);
            if *member == Member::Mat4 {
                emit(&mut self.annotations, op::MEMBER_DECORATE, &[block, index, decoration::COL_MAJOR]);
                emit(&mut self.annotations, op::MEMBER_DECORATE, &[block, index, decoration::MATRIX_STRIDE, 16]);
            }
        }
        block
    }

    fn variable(&mut self, pointee: u32, storage_class: u32, name: &str) -> u32 {
        let pointer = self.id();
        emit(&mut self.globals, op::TYPE_POINTER, &[pointer, storage_class, pointee]);
        self.variable_of(pointer, storage_class, name)
    }

    fn variable_of(&mut self, pointer: u32, storage_class: u32, name: &str) -> u32 {
        let variable = self.id();
        emit(&mut self.globals, op::VARIABLE, &[pointer, variable, storage_class]);
        self.name(variable, name);
        variable
    }

    fn image_type(&mut self) -> u32 {
        if let Some(image) = self.image {
            return image;
        }
        let image = self.id();
        // float, 2D, not depth, not arrayed, single sample, sampled, unknown format
        emit(&mut self.globals, op::TYPE_IMAGE, &[image, ID_FLOAT, 1, 0, 0, 0, 1, 0]);
        self.image = Some(image);
        image
    }

    fn bind(&mut self, variable: u32, set: u32, binding: u32) {
        self.decorate(variable, &[decoration::DESCRIPTOR_SET, set]);
        self.decorate(variable, &[decoration::BINDING, binding]);
    }

    fn resource(&mut self, resource: &Resource) {
        match resource {
            Resource::Uniform { set, binding, members } => {
                let block = self.block(members);
                let variable = self.variable(block, storage::UNIFORM, &format!("ubo_{}_{}", set, binding));
                self.bind(variable, *set, *binding);
            }
            Resource::Texture { set, binding } => {
                let pointer = match self.sampled_image_pointer {
                    Some(pointer) => pointer,
                    None => {
                        let image = self.image_type();
                        let sampled = self.id();
                        emit(&mut self.globals, op::TYPE_SAMPLED_IMAGE, &[sampled, image]);
                        let pointer = self.id();
                        emit(&mut self.globals, op::TYPE_POINTER, &[pointer, storage::UNIFORM_CONSTANT, sampled]);
                        self.sampled_image_pointer = Some(pointer);
                        pointer
                    }
                };
                let variable = self.variable_of(pointer, storage::UNIFORM_CONSTANT, &format!("tex_{}_{}", set, binding));
                self.bind(variable, *set, *binding);
            }
            Resource::SeparateImage { set, binding } => {
                let pointer = match self.image_pointer {
                    Some(pointer) => pointer,
                    None => {
                        let image = self.image_type();
                        let pointer = self.id();
                        emit(&mut self.globals, op::TYPE_POINTER, &[pointer, storage::UNIFORM_CONSTANT, image]);
                        self.image_pointer = Some(pointer);
                        pointer
                    }
                };
                let variable = self.variable_of(pointer, storage::UNIFORM_CONSTANT, &format!("img_{}_{}", set, binding));
                self.bind(variable, *set, *binding);
            }
            Resource::Push { members } => {
                let block = self.block(members);
                self.variable(block, storage::PUSH_CONSTANT, "push");
            }
        }
    }
}

/// Assemble a module for `stage` declaring `resources`
pub fn assemble(stage: Stage, resources: &[Resource]) -> Vec<u32> {
    let mut assembler = Assembler { next_id: FIRST_FREE_ID, ..Assembler::default() };
    for resource in resources {
        assembler.resource(resource);
    }
    let label = assembler.id();

    let mut module = vec![MAGIC, VERSION_1_0, 0, assembler.next_id, 0];
    emit(&mut module, op::CAPABILITY, &[1]);
    emit(&mut module, op::MEMORY_MODEL, &[0, 1]);

    let execution_model = match stage {
        Stage::Vertex => 0,
        Stage::Fragment => 4,
    };
    let mut entry = vec![execution_model, ID_MAIN];
    entry.extend(string_words("main"));
    emit(&mut module, op::ENTRY_POINT, &entry);
    if stage == Stage::Fragment {
        // OriginUpperLeft
        emit(&mut module, op::EXECUTION_MODE, &[ID_MAIN, 7]);
    }

    module.extend(&assembler.names);
    module.extend(&assembler.annotations);

    emit(&mut module, op::TYPE_VOID, &[ID_VOID]);
    emit(&mut module, op::TYPE_FUNCTION, &[ID_FN_TYPE, ID_VOID]);
    emit(&mut module, op::TYPE_FLOAT, &[ID_FLOAT, 32]);
    emit(&mut module, op::TYPE_VECTOR, &[ID_VEC4, ID_FLOAT, 4]);
    emit(&mut module, op::TYPE_MATRIX, &[ID_MAT4, ID_VEC4, 4]);
    emit(&mut module, op::TYPE_INT, &[ID_UINT, 32, 0]);
    module.extend(&assembler.globals);

    emit(&mut module, op::FUNCTION, &[ID_VOID, ID_MAIN, 0, ID_FN_TYPE]);
    emit(&mut module, op::LABEL, &[label]);
    emit(&mut module, op::RETURN, &[]);
    emit(&mut module, op::FUNCTION_END, &[]);
    module
}

/// Module bytes as they would be read from a `.spv` file
pub fn to_bytes(words: &[u32]) -> Vec<u8> {
    words.iter().flat_map(|word| word.to_le_bytes()).collect()
}
